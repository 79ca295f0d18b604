//! Commit compiler: reduces the unsent part of a transaction log to a
//! minimal mutation batch.
//!
//! ```text
//!  revert range   revert_steps ++ steps(active, original]   reversed, inverted
//!  forward range  steps(submitted, active]                  in order
//!        │
//!        ▼  remap to confirmed ids
//!  merge pass     one slot per entity run, later edits folded into it
//!        │
//!        ▼
//!  CommitPayload { transactions, vertexIdMap, edgeIdMap, txnId }
//! ```

use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::idmap::IdRemap;
use crate::model::{Edge, EdgeId, EntityRef, Vertex, VertexId};
use crate::step::Step;
use crate::transaction::{TransactionDetail, TxnId};

/// One server-side mutation. Same seven actions as [`Step`], without the
/// pre-mutation data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutation {
    Insert(Vertex),
    DeleteVertex(Vertex),
    InsertEdge(Edge),
    DeleteEdge(Edge),
    Merge(Vertex),
    Replace(Vertex),
    ReplaceEdge(Edge),
}

impl Mutation {
    pub fn action(&self) -> &'static str {
        match self {
            Mutation::Insert(_) => "insert",
            Mutation::DeleteVertex(_) => "deleteVertex",
            Mutation::InsertEdge(_) => "insertEdge",
            Mutation::DeleteEdge(_) => "deleteEdge",
            Mutation::Merge(_) => "merge",
            Mutation::Replace(_) => "replace",
            Mutation::ReplaceEdge(_) => "replaceEdge",
        }
    }

    pub fn entity(&self) -> EntityRef {
        match self {
            Mutation::Insert(v)
            | Mutation::DeleteVertex(v)
            | Mutation::Merge(v)
            | Mutation::Replace(v) => EntityRef::Vertex(v.id),
            Mutation::InsertEdge(e) | Mutation::DeleteEdge(e) | Mutation::ReplaceEdge(e) => {
                EntityRef::Edge(e.id)
            }
        }
    }

    fn edge(&self) -> Option<&Edge> {
        match self {
            Mutation::InsertEdge(e) | Mutation::DeleteEdge(e) | Mutation::ReplaceEdge(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Step> for Mutation {
    fn from(step: Step) -> Self {
        match step {
            Step::Insert(v) => Mutation::Insert(v),
            Step::DeleteVertex(v) => Mutation::DeleteVertex(v),
            Step::InsertEdge(e) => Mutation::InsertEdge(e),
            Step::DeleteEdge(e) => Mutation::DeleteEdge(e),
            Step::Merge { data, .. } => Mutation::Merge(data),
            Step::Replace { data, .. } => Mutation::Replace(data),
            Step::ReplaceEdge { data, .. } => Mutation::ReplaceEdge(data),
        }
    }
}

/// Batch handed to the remote graph database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPayload {
    pub transactions: Vec<Mutation>,
    pub vertex_id_map: Vec<(VertexId, VertexId)>,
    pub edge_id_map: Vec<(EdgeId, EdgeId)>,
    pub txn_id: TxnId,
}

impl CommitPayload {
    pub fn new(txn_id: TxnId, transactions: Vec<Mutation>, ids: &IdRemap) -> Self {
        Self {
            transactions,
            vertex_id_map: ids.vertex_pairs(),
            edge_id_map: ids.edge_pairs(),
            txn_id,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Steps the server has not seen yet, as the server should see them.
/// Does not touch the bookkeeping.
pub fn compile(txn: &TransactionDetail, ids: &IdRemap) -> Vec<Mutation> {
    let last = txn.last_index();
    let active = txn.active_undo_index;
    let mut ordered: Vec<Mutation> = Vec::new();

    let original = txn.original_submitted_index.min(last);
    let undone_committed: &[Step] = if active < original {
        &txn.steps[(active + 1) as usize..=original as usize]
    } else {
        &[]
    };
    for step in txn.revert_steps.iter().chain(undone_committed).rev() {
        ordered.push(step.remapped(ids).inverse().into());
    }

    if txn.submitted_index < active {
        let from = (txn.submitted_index + 1) as usize;
        for step in &txn.steps[from..=active as usize] {
            ordered.push(step.remapped(ids).into());
        }
    }

    let merged = merge_mutations(ordered);
    debug!("compiled {} mutations", merged.len());
    merged
}

/// Fold later mutations on an entity into its earliest surviving slot.
pub fn merge_mutations(mutations: Vec<Mutation>) -> Vec<Mutation> {
    let mut slots: Vec<Option<Mutation>> = Vec::with_capacity(mutations.len());
    let mut latest: FxHashMap<EntityRef, usize> = FxHashMap::default();

    for mutation in mutations {
        let key = mutation.entity();
        let Some(&index) = latest.get(&key) else {
            latest.insert(key, slots.len());
            slots.push(Some(mutation));
            continue;
        };
        let Some(existing) = slots[index].take() else {
            latest.insert(key, slots.len());
            slots.push(Some(mutation));
            continue;
        };

        match fold(existing, mutation, &slots) {
            Folded::Into(merged) => slots[index] = Some(merged),
            Folded::Cancelled => {
                latest.remove(&key);
            }
            Folded::Separate(existing, next) => {
                slots[index] = Some(existing);
                latest.insert(key, slots.len());
                slots.push(Some(next));
            }
        }
    }

    slots.into_iter().flatten().collect()
}

enum Folded {
    Into(Mutation),
    Cancelled,
    Separate(Mutation, Mutation),
}

fn fold(existing: Mutation, next: Mutation, slots: &[Option<Mutation>]) -> Folded {
    match (existing, next) {
        (Mutation::Insert(mut vertex), Mutation::Merge(patch)) => {
            vertex.absorb(&patch);
            Folded::Into(Mutation::Insert(vertex))
        }
        (Mutation::Insert(mut vertex), Mutation::Replace(replacement)) => {
            vertex.labels = replacement.labels;
            vertex.properties = replacement.properties;
            Folded::Into(Mutation::Insert(vertex))
        }
        (Mutation::Merge(mut vertex), Mutation::Merge(patch)) => {
            vertex.absorb(&patch);
            Folded::Into(Mutation::Merge(vertex))
        }
        (Mutation::Replace(mut vertex), Mutation::Merge(patch)) => {
            vertex.absorb(&patch);
            Folded::Into(Mutation::Replace(vertex))
        }
        (Mutation::Merge(_), Mutation::Replace(replacement))
        | (Mutation::Replace(_), Mutation::Replace(replacement)) => {
            Folded::Into(Mutation::Replace(replacement))
        }
        (Mutation::InsertEdge(_), Mutation::DeleteEdge(_)) => Folded::Cancelled,
        (Mutation::InsertEdge(mut edge), Mutation::ReplaceEdge(replacement)) => {
            edge.properties = replacement.properties;
            Folded::Into(Mutation::InsertEdge(edge))
        }
        (Mutation::ReplaceEdge(_), Mutation::ReplaceEdge(replacement)) => {
            Folded::Into(Mutation::ReplaceEdge(replacement))
        }
        (Mutation::Insert(vertex), Mutation::DeleteVertex(deleted)) => {
            let referenced = slots
                .iter()
                .flatten()
                .filter_map(Mutation::edge)
                .any(|edge| edge.touches(vertex.id));
            if referenced {
                Folded::Separate(Mutation::Insert(vertex), Mutation::DeleteVertex(deleted))
            } else {
                Folded::Cancelled
            }
        }
        (existing, next) => Folded::Separate(existing, next),
    }
}
