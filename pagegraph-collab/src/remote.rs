//! Remote graph database seam and an authoritative in-memory implementation.
//!
//! ```text
//! CommitPayload ──► RemoteGraphDb::execute ──► RemoteResponse
//!                        │
//!                        └── MemoryRemote
//!                              ├── GraphStore (authority)
//!                              ├── id allocator (1, 2, …)
//!                              └── reject-next switch
//! ```
//!
//! `MemoryRemote` applies a batch to a copy of its store and swaps it in
//! only when every mutation succeeded, so a rejected batch changes nothing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use pagegraph_core::{
    CommitPayload, EdgeId, GraphError, GraphStore, Mutation, RemoteGraph, RemoteResponse, VertexId,
};
use tokio::sync::Mutex;

use crate::protocol::ProtocolError;

/// Transport to the remote graph database.
pub trait RemoteGraphDb: Send + Sync {
    /// Send one commit batch and wait for the server's answer. `Err` means
    /// the batch never reached a verdict; a refused batch is an `Ok`
    /// response carrying `error`.
    fn execute(
        &self,
        payload: CommitPayload,
    ) -> impl Future<Output = Result<RemoteResponse, ProtocolError>> + Send;
}

/// Remote statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStats {
    pub batches_applied: u64,
    pub batches_rejected: u64,
    pub vertex_count: usize,
    pub edge_count: usize,
}

struct RemoteState {
    store: GraphStore,
    next_vertex: i64,
    next_edge: i64,
    reject_next: Option<String>,
    fail_transport: bool,
    batches: Vec<CommitPayload>,
}

pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    applied: AtomicU64,
    rejected: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                store: GraphStore::new(),
                next_vertex: 1,
                next_edge: 1,
                reject_next: None,
                fail_transport: false,
                batches: Vec::new(),
            }),
            applied: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Refuse the next batch with `message`.
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().await.reject_next = Some(message.into());
    }

    /// Drop the next request before it reaches a verdict.
    pub async fn disconnect_next(&self) {
        self.state.lock().await.fail_transport = true;
    }

    /// Copy of the authoritative store.
    pub async fn snapshot(&self) -> GraphStore {
        self.state.lock().await.store.clone()
    }

    /// Whole graph as a fragment keyed by server ids, for initial loads.
    pub async fn export(&self) -> RemoteGraph {
        let state = self.state.lock().await;
        let mut graph = RemoteGraph::default();
        for vertex in state.store.vertexes() {
            graph.vertexes.insert(vertex.id, vertex.clone());
        }
        for edge in state.store.edges() {
            graph.edges.insert(edge.id, edge.clone());
        }
        graph
    }

    /// Batches applied so far, in arrival order.
    pub async fn batches(&self) -> Vec<CommitPayload> {
        self.state.lock().await.batches.clone()
    }

    pub async fn stats(&self) -> RemoteStats {
        let state = self.state.lock().await;
        RemoteStats {
            batches_applied: self.applied.load(Ordering::Relaxed),
            batches_rejected: self.rejected.load(Ordering::Relaxed),
            vertex_count: state.store.vertex_count(),
            edge_count: state.store.edge_count(),
        }
    }

    async fn apply(&self, payload: CommitPayload) -> Result<RemoteResponse, ProtocolError> {
        let mut state = self.state.lock().await;
        if state.fail_transport {
            state.fail_transport = false;
            warn!("dropping batch for transaction {}", payload.txn_id);
            return Err(ProtocolError::ConnectionClosed);
        }
        if let Some(message) = state.reject_next.take() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("rejecting batch for transaction {}: {message}", payload.txn_id);
            return Ok(RemoteResponse::rejected(message));
        }

        let mut batch = Batch::new(&payload, state.next_vertex, state.next_edge);
        let mut store = state.store.clone();
        for mutation in &payload.transactions {
            if let Err(err) = batch.apply(&mut store, mutation) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("batch for transaction {} failed: {err}", payload.txn_id);
                return Ok(RemoteResponse::rejected(err.to_string()));
            }
        }

        let graph = batch.response(&store);
        state.store = store;
        state.next_vertex = batch.next_vertex;
        state.next_edge = batch.next_edge;
        self.applied.fetch_add(1, Ordering::Relaxed);
        info!(
            "applied {} mutations for transaction {}",
            payload.len(),
            payload.txn_id
        );
        state.batches.push(payload);
        Ok(RemoteResponse::ok(graph))
    }
}

impl RemoteGraphDb for MemoryRemote {
    fn execute(
        &self,
        payload: CommitPayload,
    ) -> impl Future<Output = Result<RemoteResponse, ProtocolError>> + Send {
        self.apply(payload)
    }
}

/// Id resolution and response bookkeeping for one batch.
struct Batch {
    known_vertexes: HashMap<VertexId, VertexId>,
    known_edges: HashMap<EdgeId, EdgeId>,
    next_vertex: i64,
    next_edge: i64,
    touched_vertexes: Vec<VertexId>,
    touched_edges: Vec<EdgeId>,
    deleted_vertexes: Vec<VertexId>,
    deleted_edges: Vec<EdgeId>,
}

impl Batch {
    fn new(payload: &CommitPayload, next_vertex: i64, next_edge: i64) -> Self {
        Self {
            known_vertexes: payload.vertex_id_map.iter().copied().collect(),
            known_edges: payload.edge_id_map.iter().copied().collect(),
            next_vertex,
            next_edge,
            touched_vertexes: Vec::new(),
            touched_edges: Vec::new(),
            deleted_vertexes: Vec::new(),
            deleted_edges: Vec::new(),
        }
    }

    fn vertex(&self, id: VertexId) -> VertexId {
        self.known_vertexes.get(&id).copied().unwrap_or(id)
    }

    fn edge(&self, id: EdgeId) -> EdgeId {
        self.known_edges.get(&id).copied().unwrap_or(id)
    }

    fn assign_vertex(&mut self, sent: VertexId) -> VertexId {
        if !sent.is_temporary() {
            return sent;
        }
        let id = VertexId(self.next_vertex);
        self.next_vertex += 1;
        self.known_vertexes.insert(sent, id);
        debug!("assigned vertex {id} to {sent}");
        id
    }

    fn assign_edge(&mut self, sent: EdgeId) -> EdgeId {
        if !sent.is_temporary() {
            return sent;
        }
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.known_edges.insert(sent, id);
        debug!("assigned edge {id} to {sent}");
        id
    }

    fn apply(&mut self, store: &mut GraphStore, mutation: &Mutation) -> Result<(), GraphError> {
        match mutation {
            Mutation::Insert(vertex) => {
                let mut vertex = vertex.detached();
                let sent = vertex.id;
                vertex.id = match self.known_vertexes.get(&sent) {
                    Some(id) => *id,
                    None => self.assign_vertex(sent),
                };
                self.touched_vertexes.push(sent);
                store.insert_vertex(vertex)
            }
            Mutation::DeleteVertex(vertex) => {
                let id = self.vertex(vertex.id);
                for edge_id in store.incident_edges(id) {
                    store.delete_edge(edge_id)?;
                    self.deleted_edges.push(edge_id);
                }
                store.delete_vertex(id)?;
                self.deleted_vertexes.push(id);
                Ok(())
            }
            Mutation::InsertEdge(edge) => {
                let mut edge = edge.clone();
                let sent = edge.id;
                edge.id = match self.known_edges.get(&sent) {
                    Some(id) => *id,
                    None => self.assign_edge(sent),
                };
                edge.start = self.vertex(edge.start);
                edge.end = self.vertex(edge.end);
                self.touched_edges.push(sent);
                store.insert_edge(edge)
            }
            Mutation::DeleteEdge(edge) => {
                let id = self.edge(edge.id);
                store.delete_edge(id)?;
                self.deleted_edges.push(id);
                Ok(())
            }
            Mutation::Merge(patch) => {
                let id = self.vertex(patch.id);
                store.merge_vertex_properties(id, &patch.properties)?;
                store.add_vertex_labels(id, &patch.labels)?;
                self.touched_vertexes.push(patch.id);
                Ok(())
            }
            Mutation::Replace(replacement) => {
                let id = self.vertex(replacement.id);
                store.set_vertex_labels(id, replacement.labels.clone())?;
                store.replace_vertex_properties(id, replacement.properties.clone())?;
                self.touched_vertexes.push(replacement.id);
                Ok(())
            }
            Mutation::ReplaceEdge(edge) => {
                let id = self.edge(edge.id);
                store.replace_edge_properties(id, edge.properties.clone())?;
                self.touched_edges.push(edge.id);
                Ok(())
            }
        }
    }

    /// Confirmed state of everything the batch touched, keyed by the id
    /// the client sent.
    fn response(&self, store: &GraphStore) -> RemoteGraph {
        let mut graph = RemoteGraph::default();
        for sent in &self.touched_vertexes {
            if let Some(vertex) = store.vertex(self.vertex(*sent)) {
                graph.vertexes.insert(*sent, vertex.clone());
            }
        }
        for sent in &self.touched_edges {
            if let Some(edge) = store.edge(self.edge(*sent)) {
                graph.edges.insert(*sent, edge.clone());
            }
        }
        graph.deleted_vertexes = self.deleted_vertexes.clone();
        graph.deleted_edges = self.deleted_edges.clone();
        graph
    }
}
