//! Invertible steps recorded in a transaction log.

use serde::{Deserialize, Serialize};

use crate::error::GraphResult;
use crate::idmap::IdRemap;
use crate::model::{EntityRef, Edge, Vertex};
use crate::store::GraphStore;

/// One recorded mutation.
///
/// `data` is the post-mutation value and `original` the pre-mutation value.
/// For [`Step::Merge`] the data is the patch that was unioned in; for
/// [`Step::Replace`] it is the complete new label list and property set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Insert(Vertex),
    /// Carries the vertex as it was when deleted.
    DeleteVertex(Vertex),
    InsertEdge(Edge),
    DeleteEdge(Edge),
    Merge {
        data: Vertex,
        #[serde(rename = "originalData")]
        original: Vertex,
    },
    Replace {
        data: Vertex,
        #[serde(rename = "originalData")]
        original: Vertex,
    },
    ReplaceEdge {
        data: Edge,
        #[serde(rename = "originalData")]
        original: Edge,
    },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Insert(_) => "insert",
            Step::DeleteVertex(_) => "deleteVertex",
            Step::InsertEdge(_) => "insertEdge",
            Step::DeleteEdge(_) => "deleteEdge",
            Step::Merge { .. } => "merge",
            Step::Replace { .. } => "replace",
            Step::ReplaceEdge { .. } => "replaceEdge",
        }
    }

    pub fn entity(&self) -> EntityRef {
        match self {
            Step::Insert(v) | Step::DeleteVertex(v) => EntityRef::Vertex(v.id),
            Step::Merge { data, .. } | Step::Replace { data, .. } => EntityRef::Vertex(data.id),
            Step::InsertEdge(e) | Step::DeleteEdge(e) => EntityRef::Edge(e.id),
            Step::ReplaceEdge { data, .. } => EntityRef::Edge(data.id),
        }
    }

    /// The step that undoes this one.
    ///
    /// Merge and replace both invert to a replace restoring the original
    /// labels and properties.
    pub fn inverse(&self) -> Step {
        match self {
            Step::Insert(v) => Step::DeleteVertex(v.clone()),
            Step::DeleteVertex(v) => Step::Insert(v.clone()),
            Step::InsertEdge(e) => Step::DeleteEdge(e.clone()),
            Step::DeleteEdge(e) => Step::InsertEdge(e.clone()),
            Step::Merge { data, original } => {
                let mut applied = original.detached();
                applied.absorb(data);
                Step::Replace {
                    data: original.detached(),
                    original: applied,
                }
            }
            Step::Replace { data, original } => Step::Replace {
                data: original.detached(),
                original: data.detached(),
            },
            Step::ReplaceEdge { data, original } => Step::ReplaceEdge {
                data: original.clone(),
                original: data.clone(),
            },
        }
    }

    /// Copy with every id resolved through the remap tables.
    pub fn remapped(&self, ids: &IdRemap) -> Step {
        if ids.is_empty() {
            return self.clone();
        }
        match self {
            Step::Insert(v) => Step::Insert(ids.remap_vertex(v)),
            Step::DeleteVertex(v) => Step::DeleteVertex(ids.remap_vertex(v)),
            Step::InsertEdge(e) => Step::InsertEdge(ids.remap_edge(e)),
            Step::DeleteEdge(e) => Step::DeleteEdge(ids.remap_edge(e)),
            Step::Merge { data, original } => Step::Merge {
                data: ids.remap_vertex(data),
                original: ids.remap_vertex(original),
            },
            Step::Replace { data, original } => Step::Replace {
                data: ids.remap_vertex(data),
                original: ids.remap_vertex(original),
            },
            Step::ReplaceEdge { data, original } => Step::ReplaceEdge {
                data: ids.remap_edge(data),
                original: ids.remap_edge(original),
            },
        }
    }

    /// Apply the forward action of this step to the store.
    pub fn apply(&self, store: &mut GraphStore) -> GraphResult<()> {
        match self {
            Step::Insert(v) => store.insert_vertex(v.clone()),
            Step::DeleteVertex(v) => store.delete_vertex(v.id).map(drop),
            Step::InsertEdge(e) => store.insert_edge(e.clone()),
            Step::DeleteEdge(e) => store.delete_edge(e.id).map(drop),
            Step::Merge { data, .. } => {
                // Check existence before touching labels so a miss leaves no trace.
                store.merge_vertex_properties(data.id, &data.properties)?;
                store.add_vertex_labels(data.id, &data.labels).map(drop)
            }
            Step::Replace { data, .. } => {
                store.set_vertex_labels(data.id, data.labels.clone())?;
                store
                    .replace_vertex_properties(data.id, data.properties.clone())
                    .map(drop)
            }
            Step::ReplaceEdge { data, .. } => store
                .replace_edge_properties(data.id, data.properties.clone())
                .map(drop),
        }
    }
}
