//! Per-session transaction log with branching history.
//!
//! ```text
//!  steps:      [ s0 | s1 | s2 | s3 | s4 ]
//!                          ▲         ▲
//!               submitted ─┘         └─ active_undo_index
//!
//!  revert_steps: committed steps cut off by a new branch; the server still
//!                believes they happened and gets their inverses next commit.
//! ```
//!
//! Positions are `i64` with `-1` meaning "before the first step".

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TxnError;
use crate::step::Step;

/// Position before the first step.
pub const NO_STEP: i64 = -1;

/// Transaction identifier. `TxnId::IMMEDIATE` applies mutations outside any log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(pub u64);

impl TxnId {
    pub const IMMEDIATE: TxnId = TxnId(0);

    #[inline]
    pub fn is_immediate(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxnStatus {
    Idle,
    Modified,
    Committed,
    Reverted,
    Error,
}

/// Bookkeeping saved when a batch is handed to the transport, restored if
/// the server rejects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlight {
    pub submitted_index: i64,
    pub original_submitted_index: i64,
    pub revert_steps: Vec<Step>,
    #[serde(default)]
    pub revert_origins: Vec<i64>,
    /// Steps this batch reverts that were cut from the log while it was
    /// out, with their log positions. Gone for good once the batch lands.
    #[serde(default)]
    pub withdrawn: Vec<(i64, Step)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    pub(crate) steps: Vec<Step>,
    pub(crate) active_undo_index: i64,
    pub(crate) undo_step_indexes: Vec<i64>,
    pub(crate) submitted_index: i64,
    pub(crate) original_submitted_index: i64,
    pub(crate) revert_steps: Vec<Step>,
    /// Log position each revert step held before it was cut off.
    #[serde(default)]
    pub(crate) revert_origins: Vec<i64>,
    pub(crate) status: TxnStatus,
    pub(crate) prevent_undo_before_index: i64,
    pub(crate) error: Option<TxnError>,
    pub(crate) in_flight: Option<InFlight>,
}

impl Default for TransactionDetail {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionDetail {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            active_undo_index: NO_STEP,
            undo_step_indexes: Vec::new(),
            submitted_index: NO_STEP,
            original_submitted_index: NO_STEP,
            revert_steps: Vec::new(),
            revert_origins: Vec::new(),
            status: TxnStatus::Idle,
            prevent_undo_before_index: NO_STEP,
            error: None,
            in_flight: None,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn active_undo_index(&self) -> i64 {
        self.active_undo_index
    }

    pub fn undo_step_indexes(&self) -> &[i64] {
        &self.undo_step_indexes
    }

    pub fn submitted_index(&self) -> i64 {
        self.submitted_index
    }

    pub fn original_submitted_index(&self) -> i64 {
        self.original_submitted_index
    }

    pub fn revert_steps(&self) -> &[Step] {
        &self.revert_steps
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn prevent_undo_before_index(&self) -> i64 {
        self.prevent_undo_before_index
    }

    pub fn error(&self) -> Option<&TxnError> {
        self.error.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Index of the last recorded step, `NO_STEP` when empty.
    pub fn last_index(&self) -> i64 {
        self.steps.len() as i64 - 1
    }

    // ---------------------------------------------------------------
    // Recording
    // ---------------------------------------------------------------

    /// Append a step at the current position, cutting off any redo branch.
    pub fn record_step(&mut self, step: Step) {
        self.truncate_after(self.active_undo_index);
        debug!(
            "record {} on {} at {}",
            step.action(),
            step.entity(),
            self.steps.len()
        );
        self.steps.push(step);
        self.active_undo_index = self.last_index();
        self.refresh_status();
    }

    /// Mark the current position as an undo/redo landing point.
    pub fn save_undo_point(&mut self) {
        let index = self.active_undo_index;
        if let Err(pos) = self.undo_step_indexes.binary_search(&index) {
            self.undo_step_indexes.insert(pos, index);
        }
    }

    /// Forbid undoing past the current position.
    pub fn set_undo_floor(&mut self) {
        self.prevent_undo_before_index = self.active_undo_index;
    }

    /// Drop every step after `branch`. Dropped steps the server already
    /// acknowledged are prepended to `revert_steps` in application order.
    pub(crate) fn truncate_after(&mut self, branch: i64) {
        let keep = (branch + 1).max(0) as usize;
        if keep >= self.steps.len() {
            return;
        }
        let original = self.original_submitted_index;
        let outstanding = self
            .in_flight
            .as_ref()
            .map_or(NO_STEP, |flight| flight.original_submitted_index);
        let mut committed = Vec::new();
        let mut withdrawn = Vec::new();
        for (offset, step) in self.steps.drain(keep..).enumerate() {
            let index = (keep + offset) as i64;
            if index <= original {
                committed.push((index, step));
            } else if index <= outstanding {
                withdrawn.push((index, step));
            }
        }
        if !committed.is_empty() {
            debug!("{} committed steps cut off at {branch}", committed.len());
            let (origins, steps): (Vec<i64>, Vec<Step>) = committed.into_iter().unzip();
            self.revert_steps.splice(0..0, steps);
            self.revert_origins.splice(0..0, origins);
        }
        if let Some(flight) = self.in_flight.as_mut() {
            flight.withdrawn.splice(0..0, withdrawn);
        }
        self.submitted_index = self.submitted_index.min(branch);
        self.original_submitted_index = self.original_submitted_index.min(branch);
        self.undo_step_indexes.retain(|&index| index <= branch);
    }

    // ---------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------

    /// Whether `commit` has anything to send.
    pub fn has_uncommitted(&self) -> bool {
        self.active_undo_index != self.submitted_index
            || self.active_undo_index < self.original_submitted_index
            || !self.revert_steps.is_empty()
    }

    pub(crate) fn compute_status(&self) -> TxnStatus {
        if self.error.is_some() {
            return TxnStatus::Error;
        }
        if self.active_undo_index < self.original_submitted_index {
            return TxnStatus::Reverted;
        }
        if self.in_flight.is_some() {
            return TxnStatus::Modified;
        }
        let settled = self.active_undo_index == self.submitted_index
            && self.submitted_index == self.original_submitted_index
            && self.revert_steps.is_empty();
        match (settled, self.active_undo_index) {
            (true, NO_STEP) => TxnStatus::Idle,
            (true, _) => TxnStatus::Committed,
            (false, _) => TxnStatus::Modified,
        }
    }

    pub(crate) fn refresh_status(&mut self) {
        self.status = self.compute_status();
    }

    pub(crate) fn fail(&mut self, error: TxnError) {
        self.error = Some(error);
        self.refresh_status();
    }

    // ---------------------------------------------------------------
    // Commit bookkeeping
    // ---------------------------------------------------------------

    /// Everything up to the current position is now considered sent.
    pub(crate) fn begin_commit(&mut self) {
        if self.in_flight.is_none() {
            self.in_flight = Some(InFlight {
                submitted_index: self.submitted_index,
                original_submitted_index: self.original_submitted_index,
                revert_steps: self.revert_steps.clone(),
                revert_origins: self.revert_origins.clone(),
                withdrawn: Vec::new(),
            });
        }
        self.submitted_index = self.active_undo_index;
        self.original_submitted_index = self.active_undo_index;
        self.revert_steps.clear();
        self.revert_origins.clear();
        self.refresh_status();
    }

    /// A compiled batch turned out empty: nothing needs the server.
    pub(crate) fn settle_without_send(&mut self) {
        self.submitted_index = self.active_undo_index;
        self.original_submitted_index = self.active_undo_index;
        self.revert_steps.clear();
        self.revert_origins.clear();
        self.refresh_status();
    }

    pub(crate) fn finish_commit(&mut self) {
        self.in_flight = None;
        self.error = None;
        self.refresh_status();
    }

    /// Restore the pre-commit bookkeeping so the same work is compiled
    /// again on retry. Edits made while the batch was out are kept.
    ///
    /// Steps cut off while the batch was out are re-sorted by what the
    /// server still holds without it: those the batch carried forward are
    /// dropped, those the batch was reverting become revert steps again.
    pub(crate) fn abort_commit(&mut self, error: TxnError) {
        if let Some(previous) = self.in_flight.take() {
            let acknowledged = previous.original_submitted_index;
            let mut cut: Vec<(i64, Step)> = self
                .revert_origins
                .drain(..)
                .zip(self.revert_steps.drain(..))
                .filter(|(origin, _)| *origin <= acknowledged)
                .chain(previous.withdrawn)
                .collect();
            cut.sort_by_key(|(origin, _)| *origin);

            self.revert_steps = previous.revert_steps;
            self.revert_origins = previous.revert_origins;
            for (origin, step) in cut {
                self.revert_origins.push(origin);
                self.revert_steps.push(step);
            }
            self.submitted_index = previous.submitted_index.min(self.submitted_index);
            self.original_submitted_index = acknowledged.min(self.original_submitted_index);
        }
        self.fail(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Vertex, VertexId};

    fn insert(id: i64) -> Step {
        Step::Insert(Vertex::new(VertexId(id), "Node"))
    }

    #[test]
    fn test_new_transaction_is_idle() {
        let txn = TransactionDetail::new();
        assert_eq!(txn.status(), TxnStatus::Idle);
        assert_eq!(txn.active_undo_index(), NO_STEP);
        assert!(!txn.has_uncommitted());
    }

    #[test]
    fn test_record_advances_and_modifies() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.record_step(insert(-2));
        assert_eq!(txn.active_undo_index(), 1);
        assert_eq!(txn.status(), TxnStatus::Modified);
        assert!(txn.has_uncommitted());
    }

    #[test]
    fn test_save_undo_point_sorted_and_unique() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.save_undo_point();
        txn.save_undo_point();
        txn.record_step(insert(-2));
        txn.record_step(insert(-3));
        txn.save_undo_point();
        assert_eq!(txn.undo_step_indexes(), &[0, 2]);
    }

    #[test]
    fn test_branch_discards_uncommitted_steps() {
        let mut txn = TransactionDetail::new();
        for id in 1..=3 {
            txn.record_step(insert(-id));
        }
        txn.save_undo_point();
        txn.active_undo_index = 0;
        txn.record_step(insert(-9));

        assert_eq!(txn.steps().len(), 2);
        assert!(txn.revert_steps().is_empty());
        assert!(txn.undo_step_indexes().is_empty());
    }

    #[test]
    fn test_branch_over_committed_steps_creates_reverts() {
        let mut txn = TransactionDetail::new();
        for id in 1..=3 {
            txn.record_step(insert(-id));
        }
        txn.submitted_index = 2;
        txn.original_submitted_index = 2;
        txn.active_undo_index = 0;
        txn.submitted_index = 0;

        txn.record_step(insert(-4));

        assert_eq!(txn.revert_steps(), &[insert(-2), insert(-3)]);
        assert_eq!(txn.submitted_index(), 0);
        assert_eq!(txn.original_submitted_index(), 0);
        assert_eq!(txn.active_undo_index(), 1);
        assert_eq!(txn.status(), TxnStatus::Modified);
    }

    #[test]
    fn test_status_reverted_when_below_original() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.record_step(insert(-2));
        txn.begin_commit();
        txn.finish_commit();
        assert_eq!(txn.status(), TxnStatus::Committed);

        txn.active_undo_index = 0;
        txn.submitted_index = 0;
        txn.refresh_status();
        assert_eq!(txn.status(), TxnStatus::Reverted);
    }

    #[test]
    fn test_error_is_sticky_until_commit_finishes() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.fail(TxnError::new("commit_error", "offline"));
        txn.record_step(insert(-2));
        assert_eq!(txn.status(), TxnStatus::Error);

        txn.begin_commit();
        assert_eq!(txn.status(), TxnStatus::Error);
        txn.finish_commit();
        assert_eq!(txn.status(), TxnStatus::Committed);
        assert!(txn.error().is_none());
    }

    #[test]
    fn test_abort_commit_restores_bookkeeping() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.record_step(insert(-2));
        txn.begin_commit();
        assert!(!txn.has_uncommitted());

        txn.abort_commit(TxnError::new("commit_error", "rejected"));
        assert_eq!(txn.submitted_index(), NO_STEP);
        assert!(txn.has_uncommitted());
        assert_eq!(txn.status(), TxnStatus::Error);
    }

    #[test]
    fn test_abort_drops_reverts_of_unsent_steps() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.begin_commit();

        // Undo and branch while the batch is out.
        txn.active_undo_index = NO_STEP;
        txn.submitted_index = NO_STEP;
        txn.record_step(insert(-2));
        assert_eq!(txn.revert_steps(), &[insert(-1)]);

        txn.abort_commit(TxnError::new("commit_error", "rejected"));
        assert!(txn.revert_steps().is_empty());
        assert_eq!(txn.steps(), &[insert(-2)]);
        assert_eq!(txn.submitted_index(), NO_STEP);
        assert_eq!(txn.original_submitted_index(), NO_STEP);
    }

    #[test]
    fn test_abort_restores_reverts_withdrawn_in_flight() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.record_step(insert(-2));
        txn.begin_commit();
        txn.finish_commit();

        // The next batch reverts step 1; a branch then cuts it off.
        txn.active_undo_index = 0;
        txn.submitted_index = 0;
        txn.begin_commit();
        txn.record_step(insert(-3));
        assert!(txn.revert_steps().is_empty());

        txn.abort_commit(TxnError::new("commit_error", "rejected"));
        assert_eq!(txn.revert_steps(), &[insert(-2)]);
        assert_eq!(txn.steps(), &[insert(-1), insert(-3)]);
        assert_eq!(txn.original_submitted_index(), 0);
        assert!(txn.has_uncommitted());
    }

    #[test]
    fn test_accepted_batch_keeps_reverts_of_sent_steps() {
        let mut txn = TransactionDetail::new();
        txn.record_step(insert(-1));
        txn.begin_commit();
        txn.active_undo_index = NO_STEP;
        txn.submitted_index = NO_STEP;
        txn.record_step(insert(-2));

        txn.finish_commit();
        assert_eq!(txn.revert_steps(), &[insert(-1)]);
        assert_eq!(txn.status(), TxnStatus::Modified);
    }
}
