//! Vertex and edge records as held by the client-side store.
//!
//! Field names on the wire follow the backing graph database:
//! `L` (labels), `P` (properties), `IN`/`OUT` (adjacency), `T`/`S`/`E`
//! (edge type, start, end).

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Property map of a vertex or edge.
pub type Properties = BTreeMap<String, Value>;

/// Edge type → ordered set of edge ids.
pub type Adjacency = BTreeMap<String, IndexSet<EdgeId>>;

/// Vertex identifier. Negative values are local placeholders that have not
/// been confirmed by the server yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub i64);

impl VertexId {
    #[inline]
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edge identifier, same conventions as [`VertexId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub i64);

impl EdgeId {
    #[inline]
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either kind of entity, used for error reporting and per-entity bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityRef {
    Vertex(VertexId),
    Edge(EdgeId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Vertex(id) => write!(f, "vertex {id}"),
            EntityRef::Edge(id) => write!(f, "edge {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    #[serde(rename = "L")]
    pub labels: Vec<String>,
    #[serde(rename = "P", default)]
    pub properties: Properties,
    #[serde(rename = "IN", default)]
    pub in_edges: Adjacency,
    #[serde(rename = "OUT", default)]
    pub out_edges: Adjacency,
}

impl Vertex {
    pub fn new(id: VertexId, label: impl Into<String>) -> Self {
        Self {
            id,
            labels: vec![label.into()],
            properties: Properties::new(),
            in_edges: Adjacency::new(),
            out_edges: Adjacency::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Shallow union: keys in `patch` overwrite, labels are appended if new.
    pub fn absorb(&mut self, patch: &Vertex) {
        for label in &patch.labels {
            if !self.labels.contains(label) {
                self.labels.push(label.clone());
            }
        }
        for (key, value) in &patch.properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }

    /// A copy with only identity, labels and properties (no adjacency).
    pub fn detached(&self) -> Vertex {
        Vertex {
            id: self.id,
            labels: self.labels.clone(),
            properties: self.properties.clone(),
            in_edges: Adjacency::new(),
            out_edges: Adjacency::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    #[serde(rename = "T")]
    pub edge_type: String,
    #[serde(rename = "S")]
    pub start: VertexId,
    #[serde(rename = "E")]
    pub end: VertexId,
    #[serde(rename = "P", default)]
    pub properties: Properties,
}

impl Edge {
    pub fn new(id: EdgeId, edge_type: impl Into<String>, start: VertexId, end: VertexId) -> Self {
        Self {
            id,
            edge_type: edge_type.into(),
            start,
            end,
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn touches(&self, vertex: VertexId) -> bool {
        self.start == vertex || self.end == vertex
    }
}

/// Insert `id` into `adjacency[edge_type]` with set semantics.
pub(crate) fn adjacency_insert(adjacency: &mut Adjacency, edge_type: &str, id: EdgeId) {
    adjacency.entry(edge_type.to_string()).or_default().insert(id);
}

/// Remove `id` from `adjacency[edge_type]`, dropping the bucket when empty.
pub(crate) fn adjacency_remove(adjacency: &mut Adjacency, edge_type: &str, id: EdgeId) {
    if let Some(bucket) = adjacency.get_mut(edge_type) {
        bucket.shift_remove(&id);
        if bucket.is_empty() {
            adjacency.remove(edge_type);
        }
    }
}
