//! Undo / redo over a transaction log.
//!
//! Moving through history replays steps against the live store: inverses
//! newest-first when going back, forward actions oldest-first when going
//! forward. Steps are resolved through the id tables first, since the ids
//! captured when a step was recorded may have been confirmed by the server
//! in the meantime.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult, TxnError};
use crate::idmap::IdRemap;
use crate::step::Step;
use crate::store::GraphStore;
use crate::transaction::{TransactionDetail, NO_STEP};

/// Options for [`undo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRequest {
    /// Step index to land on. Defaults to the nearest checkpoint below the
    /// current position, else one step back.
    #[serde(default)]
    pub target: Option<i64>,
    /// Remove the undone steps instead of keeping them for redo.
    #[serde(default)]
    pub discard: bool,
    /// Ignore the undo floor. Used when a whole transaction is thrown away.
    #[serde(skip)]
    pub(crate) ignore_floor: bool,
}

impl UndoRequest {
    pub fn to(target: i64) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    pub fn discarding(mut self) -> Self {
        self.discard = true;
        self
    }
}

/// Outcome of a history move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMove {
    Moved { from: i64, to: i64 },
    /// Nothing to do: empty log, at a boundary, or below the floor.
    Blocked,
}

impl HistoryMove {
    pub fn moved(self) -> bool {
        matches!(self, HistoryMove::Moved { .. })
    }
}

fn default_undo_target(txn: &TransactionDetail) -> i64 {
    let active = txn.active_undo_index;
    txn.undo_step_indexes
        .iter()
        .rev()
        .copied()
        .find(|&index| index < active)
        .unwrap_or(active - 1)
}

fn default_redo_target(txn: &TransactionDetail) -> i64 {
    let active = txn.active_undo_index;
    txn.undo_step_indexes
        .iter()
        .copied()
        .find(|&index| index > active)
        .unwrap_or(active + 1)
        .min(txn.last_index())
}

/// Step the transaction back to `request.target`.
///
/// `on_applied` sees every step actually applied to the store (already
/// inverted and remapped).
pub fn undo(
    txn: &mut TransactionDetail,
    store: &mut GraphStore,
    ids: &IdRemap,
    request: UndoRequest,
    mut on_applied: impl FnMut(&Step),
) -> GraphResult<HistoryMove> {
    let active = txn.active_undo_index;
    if txn.steps.is_empty() || active < 0 {
        return Ok(HistoryMove::Blocked);
    }
    let target = request.target.unwrap_or_else(|| default_undo_target(txn));
    if target >= active || target < NO_STEP {
        return Ok(HistoryMove::Blocked);
    }
    if !request.ignore_floor && target < txn.prevent_undo_before_index {
        debug!(
            "undo to {target} blocked by floor {}",
            txn.prevent_undo_before_index
        );
        return Ok(HistoryMove::Blocked);
    }

    let mut position = active;
    while position > target {
        let step = txn.steps[position as usize].remapped(ids).inverse();
        if let Err(err) = step.apply(store) {
            let err = GraphError::UndoError(format!("step {position}: {err}"));
            warn!("{err}");
            txn.active_undo_index = position;
            txn.fail(TxnError::from(&err));
            return Err(err);
        }
        on_applied(&step);
        position -= 1;
    }

    txn.active_undo_index = target;
    txn.submitted_index = txn.submitted_index.min(target);
    if request.discard {
        txn.truncate_after(target);
    }
    txn.refresh_status();
    debug!("undo {active} -> {target}");
    Ok(HistoryMove::Moved {
        from: active,
        to: target,
    })
}

/// Step the transaction forward to the next checkpoint (or one step).
pub fn redo(
    txn: &mut TransactionDetail,
    store: &mut GraphStore,
    ids: &IdRemap,
    mut on_applied: impl FnMut(&Step),
) -> GraphResult<HistoryMove> {
    let active = txn.active_undo_index;
    if active >= txn.last_index() {
        return Ok(HistoryMove::Blocked);
    }
    let target = default_redo_target(txn);

    for position in (active + 1)..=target {
        let step = txn.steps[position as usize].remapped(ids);
        if let Err(err) = step.apply(store) {
            let err = GraphError::RedoError(format!("step {position}: {err}"));
            warn!("{err}");
            txn.active_undo_index = position - 1;
            txn.fail(TxnError::from(&err));
            return Err(err);
        }
        on_applied(&step);
    }

    txn.active_undo_index = target;
    if txn.submitted_index < txn.original_submitted_index {
        txn.submitted_index = target.min(txn.original_submitted_index);
    }
    txn.refresh_status();
    debug!("redo {active} -> {target}");
    Ok(HistoryMove::Moved {
        from: active,
        to: target,
    })
}
