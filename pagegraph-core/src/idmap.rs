//! Temporary → confirmed id tables.
//!
//! Entries are written when a commit response assigns server ids and are
//! consulted whenever a recorded step is replayed or compiled, since the ids
//! captured at record time may have been confirmed since.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::model::{Adjacency, Edge, EdgeId, Vertex, VertexId};

/// Upper bound on chain walks; chains are compressed on write so this only
/// guards against a malformed cycle.
const MAX_CHAIN: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdRemap {
    vertexes: FxHashMap<VertexId, VertexId>,
    edges: FxHashMap<EdgeId, EdgeId>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty() && self.edges.is_empty()
    }

    /// Record `old → new`. Existing entries pointing at `old` are redirected
    /// to `new` so every lookup is a single hop.
    pub fn record_vertex(&mut self, old: VertexId, new: VertexId) {
        if old == new {
            return;
        }
        let new = self.vertex(new);
        for target in self.vertexes.values_mut() {
            if *target == old {
                *target = new;
            }
        }
        self.vertexes.insert(old, new);
    }

    pub fn record_edge(&mut self, old: EdgeId, new: EdgeId) {
        if old == new {
            return;
        }
        let new = self.edge(new);
        for target in self.edges.values_mut() {
            if *target == old {
                *target = new;
            }
        }
        self.edges.insert(old, new);
    }

    /// Current id for `id` (itself when never remapped).
    pub fn vertex(&self, id: VertexId) -> VertexId {
        let mut current = id;
        for _ in 0..MAX_CHAIN {
            match self.vertexes.get(&current) {
                Some(next) if *next != current => current = *next,
                _ => break,
            }
        }
        current
    }

    pub fn edge(&self, id: EdgeId) -> EdgeId {
        let mut current = id;
        for _ in 0..MAX_CHAIN {
            match self.edges.get(&current) {
                Some(next) if *next != current => current = *next,
                _ => break,
            }
        }
        current
    }

    /// Rewrite the vertex id and every edge id in its adjacency.
    pub fn remap_vertex(&self, vertex: &Vertex) -> Vertex {
        let mut remapped = vertex.clone();
        remapped.id = self.vertex(vertex.id);
        if !self.edges.is_empty() {
            remapped.in_edges = self.remap_adjacency(&vertex.in_edges);
            remapped.out_edges = self.remap_adjacency(&vertex.out_edges);
        }
        remapped
    }

    /// Rewrite the edge id and both endpoints.
    pub fn remap_edge(&self, edge: &Edge) -> Edge {
        let mut remapped = edge.clone();
        remapped.id = self.edge(edge.id);
        remapped.start = self.vertex(edge.start);
        remapped.end = self.vertex(edge.end);
        remapped
    }

    fn remap_adjacency(&self, adjacency: &Adjacency) -> Adjacency {
        adjacency
            .iter()
            .map(|(edge_type, ids)| {
                (
                    edge_type.clone(),
                    ids.iter().map(|id| self.edge(*id)).collect(),
                )
            })
            .collect()
    }

    /// Vertex pairs sorted by old id, as sent with a commit batch.
    pub fn vertex_pairs(&self) -> Vec<(VertexId, VertexId)> {
        let mut pairs: Vec<_> = self.vertexes.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn edge_pairs(&self) -> Vec<(EdgeId, EdgeId)> {
        let mut pairs: Vec<_> = self.edges.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.sort_unstable();
        pairs
    }
}
