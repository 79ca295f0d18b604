//! Applying server responses and sibling-session updates to the store.
//!
//! ```text
//!  RemoteGraph
//!   ├─ vertexes / edges    keyed by the id the client sent
//!   │     key ≠ value.id   → substitution: record in IdRemap, re-key store
//!   │     then upsert      → labels/adjacency unioned, properties overwritten
//!   └─ deleted_*           → removed if present (vertices cascade to edges)
//! ```

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::GraphResult;
use crate::idmap::IdRemap;
use crate::model::{Edge, EdgeId, Vertex, VertexId};
use crate::store::GraphStore;

/// Graph fragment returned by the remote database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteGraph {
    #[serde(default)]
    pub vertexes: BTreeMap<VertexId, Vertex>,
    #[serde(default)]
    pub edges: BTreeMap<EdgeId, Edge>,
    #[serde(default)]
    pub deleted_vertexes: Vec<VertexId>,
    #[serde(default)]
    pub deleted_edges: Vec<EdgeId>,
}

impl RemoteGraph {
    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty()
            && self.edges.is_empty()
            && self.deleted_vertexes.is_empty()
            && self.deleted_edges.is_empty()
    }
}

/// Response to a commit batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    #[serde(default)]
    pub graph: RemoteGraph,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteResponse {
    pub fn ok(graph: RemoteGraph) -> Self {
        Self { graph, error: None }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            graph: RemoteGraph::default(),
            error: Some(message.into()),
        }
    }
}

/// Single change relayed between sessions of the same client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteUpdate {
    UpdateVertex(Vertex),
    UpdateEdge(Edge),
    DeleteVertex(VertexId),
    DeleteEdge(EdgeId),
}

/// What a merge changed, by final id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub vertexes: Vec<VertexId>,
    pub edges: Vec<EdgeId>,
    pub deleted_vertexes: Vec<VertexId>,
    pub deleted_edges: Vec<EdgeId>,
    pub rekeyed_vertexes: Vec<(VertexId, VertexId)>,
    pub rekeyed_edges: Vec<(EdgeId, EdgeId)>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty()
            && self.edges.is_empty()
            && self.deleted_vertexes.is_empty()
            && self.deleted_edges.is_empty()
            && self.rekeyed_vertexes.is_empty()
            && self.rekeyed_edges.is_empty()
    }

    /// Updates to relay to sibling sessions, in an order that lets them
    /// apply each one on its own: vertices, edges, then deletions.
    pub fn updates(&self, store: &GraphStore) -> Vec<RemoteUpdate> {
        let mut updates = Vec::new();
        updates.extend(
            self.vertexes
                .iter()
                .filter_map(|id| store.vertex(*id))
                .map(|v| RemoteUpdate::UpdateVertex(v.clone())),
        );
        updates.extend(
            self.edges
                .iter()
                .filter_map(|id| store.edge(*id))
                .map(|e| RemoteUpdate::UpdateEdge(e.clone())),
        );
        updates.extend(self.deleted_edges.iter().map(|id| RemoteUpdate::DeleteEdge(*id)));
        updates.extend(
            self.deleted_vertexes
                .iter()
                .map(|id| RemoteUpdate::DeleteVertex(*id)),
        );
        updates
    }
}

/// Merge a server fragment into the store, recording id substitutions.
///
/// Records the server cannot apply locally (e.g. a new vertex without
/// labels) are skipped with a warning so the rest of the fragment lands.
pub fn merge_remote_graph(
    store: &mut GraphStore,
    ids: &mut IdRemap,
    graph: RemoteGraph,
) -> GraphResult<MergeReport> {
    let mut report = MergeReport::default();

    for (sent, vertex) in &graph.vertexes {
        if *sent != vertex.id {
            ids.record_vertex(*sent, vertex.id);
            if store.rekey_vertex(*sent, vertex.id).is_ok() {
                debug!("vertex {sent} confirmed as {}", vertex.id);
            }
            report.rekeyed_vertexes.push((*sent, vertex.id));
        }
    }
    for (sent, edge) in &graph.edges {
        if *sent != edge.id {
            ids.record_edge(*sent, edge.id);
            if store.contains_edge(*sent) {
                store.rekey_edge(*sent, edge.id)?;
                debug!("edge {sent} confirmed as {}", edge.id);
            }
            report.rekeyed_edges.push((*sent, edge.id));
        }
    }

    for vertex in graph.vertexes.into_values() {
        let vertex = ids.remap_vertex(&vertex);
        let id = vertex.id;
        match store.upsert_remote_vertex(vertex) {
            Ok(()) => report.vertexes.push(id),
            Err(err) => warn!("skipping remote vertex {id}: {err}"),
        }
    }
    for edge in graph.edges.into_values() {
        let edge = ids.remap_edge(&edge);
        let id = edge.id;
        match store.upsert_remote_edge(edge) {
            Ok(()) => report.edges.push(id),
            Err(err) => warn!("skipping remote edge {id}: {err}"),
        }
    }

    for id in graph.deleted_edges {
        let id = ids.edge(id);
        if store.delete_edge(id).is_ok() {
            report.deleted_edges.push(id);
        }
    }
    for id in graph.deleted_vertexes {
        let id = ids.vertex(id);
        if store.contains_vertex(id) {
            remove_vertex_cascading(store, id, &mut report)?;
        }
    }

    info!(
        "merged remote graph: {} vertexes, {} edges, {} deletions, {} substitutions",
        report.vertexes.len(),
        report.edges.len(),
        report.deleted_vertexes.len() + report.deleted_edges.len(),
        report.rekeyed_vertexes.len() + report.rekeyed_edges.len()
    );
    Ok(report)
}

/// Apply one update from a sibling session, last write wins.
pub fn apply_remote_update(
    store: &mut GraphStore,
    ids: &IdRemap,
    update: RemoteUpdate,
) -> GraphResult<MergeReport> {
    let mut report = MergeReport::default();
    match update {
        RemoteUpdate::UpdateVertex(vertex) => {
            let vertex = ids.remap_vertex(&vertex);
            report.vertexes.push(vertex.id);
            store.upsert_remote_vertex(vertex)?;
        }
        RemoteUpdate::UpdateEdge(edge) => {
            let edge = ids.remap_edge(&edge);
            report.edges.push(edge.id);
            store.upsert_remote_edge(edge)?;
        }
        RemoteUpdate::DeleteEdge(id) => {
            let id = ids.edge(id);
            if store.delete_edge(id).is_ok() {
                report.deleted_edges.push(id);
            }
        }
        RemoteUpdate::DeleteVertex(id) => {
            let id = ids.vertex(id);
            if store.contains_vertex(id) {
                remove_vertex_cascading(store, id, &mut report)?;
            }
        }
    }
    Ok(report)
}

fn remove_vertex_cascading(
    store: &mut GraphStore,
    id: VertexId,
    report: &mut MergeReport,
) -> GraphResult<()> {
    for edge_id in store.incident_edges(id) {
        store.delete_edge(edge_id)?;
        report.deleted_edges.push(edge_id);
    }
    store.delete_vertex(id)?;
    report.deleted_vertexes.push(id);
    Ok(())
}
