//! In-memory property-graph store.
//!
//! ```text
//!  vertexes: VertexId ─► Vertex { L, P, IN, OUT }
//!  edges:    EdgeId   ─► Edge   { T, S, E, P }
//!  label_index: label ─► {VertexId}        (insertion ordered)
//!  incident:    VertexId ─► {EdgeId}       (edges naming the id as S or E,
//!                                           present vertex or not)
//! ```
//!
//! Every primitive either applies completely or returns an error without
//! touching any map. Adjacency buckets use set semantics and are removed when
//! they become empty, so two stores holding the same graph compare equal no
//! matter which sequence of operations built them.

use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use crate::error::{GraphError, GraphResult};
use crate::model::{
    adjacency_insert, adjacency_remove, Adjacency, Edge, EdgeId, EntityRef, Properties, Vertex,
    VertexId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStore {
    vertexes: FxHashMap<VertexId, Vertex>,
    edges: FxHashMap<EdgeId, Edge>,
    label_index: FxHashMap<String, IndexSet<VertexId>>,
    incident: FxHashMap<VertexId, IndexSet<EdgeId>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    #[inline]
    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertexes.get(&id)
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    #[inline]
    pub fn contains_vertex(&self, id: VertexId) -> bool {
        self.vertexes.contains_key(&id)
    }

    #[inline]
    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertexes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertexes(&self) -> impl Iterator<Item = &Vertex> {
        self.vertexes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Vertices carrying `label`, in the order they were indexed.
    pub fn vertices_with_label(&self, label: &str) -> Vec<&Vertex> {
        self.label_index
            .get(label)
            .map(|ids| ids.iter().filter_map(|id| self.vertexes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Targets of `id`'s outgoing edges of `edge_type` (`->Type`).
    pub fn out_vertices(&self, id: VertexId, edge_type: &str) -> Vec<&Vertex> {
        self.neighbours(id, edge_type, Direction::Out)
    }

    /// Sources of `id`'s incoming edges of `edge_type` (`<-Type`).
    pub fn in_vertices(&self, id: VertexId, edge_type: &str) -> Vec<&Vertex> {
        self.neighbours(id, edge_type, Direction::In)
    }

    fn neighbours(&self, id: VertexId, edge_type: &str, direction: Direction) -> Vec<&Vertex> {
        let Some(vertex) = self.vertexes.get(&id) else {
            return Vec::new();
        };
        let adjacency = match direction {
            Direction::In => &vertex.in_edges,
            Direction::Out => &vertex.out_edges,
        };
        let Some(bucket) = adjacency.get(edge_type) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .filter_map(|edge| {
                let other = match direction {
                    Direction::In => edge.start,
                    Direction::Out => edge.end,
                };
                self.vertexes.get(&other)
            })
            .collect()
    }

    /// Ids of locally present edges that name `id` as start or end.
    pub fn incident_edges(&self, id: VertexId) -> Vec<EdgeId> {
        self.incident
            .get(&id)
            .map(|ids| ids.iter().copied().filter(|e| self.edges.contains_key(e)).collect())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------
    // Vertex primitives
    // ---------------------------------------------------------------

    /// Insert a vertex. Adjacency entries not backed by a stored edge are
    /// dropped; stored edges that already name this vertex are attached.
    pub fn insert_vertex(&mut self, vertex: Vertex) -> GraphResult<()> {
        if vertex.labels.is_empty() {
            return Err(GraphError::EmptyLabels(vertex.id));
        }
        if self.vertexes.contains_key(&vertex.id) {
            return Err(GraphError::DuplicateId(EntityRef::Vertex(vertex.id)));
        }

        let mut vertex = vertex;
        vertex.in_edges = self.backed_adjacency(vertex.id, &vertex.in_edges, Direction::In);
        vertex.out_edges = self.backed_adjacency(vertex.id, &vertex.out_edges, Direction::Out);

        if let Some(incident) = self.incident.get(&vertex.id) {
            for edge_id in incident {
                let Some(edge) = self.edges.get(edge_id) else {
                    continue;
                };
                if edge.end == vertex.id {
                    adjacency_insert(&mut vertex.in_edges, &edge.edge_type, edge.id);
                }
                if edge.start == vertex.id {
                    adjacency_insert(&mut vertex.out_edges, &edge.edge_type, edge.id);
                }
            }
        }

        self.index_labels(vertex.id, &vertex.labels);
        self.vertexes.insert(vertex.id, vertex);
        Ok(())
    }

    /// Remove a vertex and its label registrations. Edges naming it stay in
    /// the store until deleted on their own.
    pub fn delete_vertex(&mut self, id: VertexId) -> GraphResult<Vertex> {
        let vertex = self
            .vertexes
            .remove(&id)
            .ok_or(GraphError::EntityNotFound(EntityRef::Vertex(id)))?;
        self.unindex_labels(id, &vertex.labels);
        Ok(vertex)
    }

    /// Shallow property union. Returns the vertex as it was before.
    pub fn merge_vertex_properties(
        &mut self,
        id: VertexId,
        properties: &Properties,
    ) -> GraphResult<Vertex> {
        let vertex = self.vertex_mut(id)?;
        let previous = vertex.detached();
        for (key, value) in properties {
            vertex.properties.insert(key.clone(), value.clone());
        }
        Ok(previous)
    }

    /// Full property replacement. Returns the vertex as it was before.
    pub fn replace_vertex_properties(
        &mut self,
        id: VertexId,
        properties: Properties,
    ) -> GraphResult<Vertex> {
        let vertex = self.vertex_mut(id)?;
        let previous = vertex.detached();
        vertex.properties = properties;
        Ok(previous)
    }

    /// Append labels the vertex does not carry yet.
    pub fn add_vertex_labels(&mut self, id: VertexId, labels: &[String]) -> GraphResult<Vertex> {
        let vertex = self.vertex_mut(id)?;
        let previous = vertex.detached();
        let added: Vec<String> = labels
            .iter()
            .filter(|label| !vertex.labels.contains(label))
            .cloned()
            .collect();
        vertex.labels.extend(added.iter().cloned());
        self.index_labels(id, &added);
        Ok(previous)
    }

    /// Replace the label list wholesale.
    pub fn set_vertex_labels(&mut self, id: VertexId, labels: Vec<String>) -> GraphResult<Vertex> {
        if labels.is_empty() {
            return Err(GraphError::EmptyLabels(id));
        }
        let vertex = self.vertex_mut(id)?;
        let previous = vertex.detached();
        vertex.labels = labels.clone();
        self.unindex_labels(id, &previous.labels);
        self.index_labels(id, &labels);
        Ok(previous)
    }

    fn vertex_mut(&mut self, id: VertexId) -> GraphResult<&mut Vertex> {
        self.vertexes
            .get_mut(&id)
            .ok_or(GraphError::EntityNotFound(EntityRef::Vertex(id)))
    }

    // ---------------------------------------------------------------
    // Edge primitives
    // ---------------------------------------------------------------

    /// Insert an edge and register it on both endpoints that are present.
    pub fn insert_edge(&mut self, edge: Edge) -> GraphResult<()> {
        if self.edges.contains_key(&edge.id) {
            return Err(GraphError::DuplicateId(EntityRef::Edge(edge.id)));
        }
        if let Some(start) = self.vertexes.get_mut(&edge.start) {
            adjacency_insert(&mut start.out_edges, &edge.edge_type, edge.id);
        }
        if let Some(end) = self.vertexes.get_mut(&edge.end) {
            adjacency_insert(&mut end.in_edges, &edge.edge_type, edge.id);
        }
        self.incident.entry(edge.start).or_default().insert(edge.id);
        self.incident.entry(edge.end).or_default().insert(edge.id);
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    /// Remove an edge and unregister it from both endpoints.
    pub fn delete_edge(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let edge = self
            .edges
            .remove(&id)
            .ok_or(GraphError::EntityNotFound(EntityRef::Edge(id)))?;
        if let Some(start) = self.vertexes.get_mut(&edge.start) {
            adjacency_remove(&mut start.out_edges, &edge.edge_type, id);
        }
        if let Some(end) = self.vertexes.get_mut(&edge.end) {
            adjacency_remove(&mut end.in_edges, &edge.edge_type, id);
        }
        for endpoint in [edge.start, edge.end] {
            if let Some(ids) = self.incident.get_mut(&endpoint) {
                ids.shift_remove(&id);
                if ids.is_empty() {
                    self.incident.remove(&endpoint);
                }
            }
        }
        Ok(edge)
    }

    /// Full edge property replacement. Returns the edge as it was before.
    pub fn replace_edge_properties(
        &mut self,
        id: EdgeId,
        properties: Properties,
    ) -> GraphResult<Edge> {
        let edge = self
            .edges
            .get_mut(&id)
            .ok_or(GraphError::EntityNotFound(EntityRef::Edge(id)))?;
        let previous = edge.clone();
        edge.properties = properties;
        Ok(previous)
    }

    // ---------------------------------------------------------------
    // Re-keying and remote upserts
    // ---------------------------------------------------------------

    /// Move a vertex to a new id. Incident edges are rewritten to point at
    /// `to`, also when the vertex itself is not held locally. If `to` is
    /// already present the two records are folded together: the existing
    /// properties win, labels and adjacency are unioned.
    pub fn rekey_vertex(&mut self, from: VertexId, to: VertexId) -> GraphResult<()> {
        if from == to {
            return Ok(());
        }
        if !self.vertexes.contains_key(&from) && !self.incident.contains_key(&from) {
            return Err(GraphError::EntityNotFound(EntityRef::Vertex(from)));
        }

        let incident = self.incident.remove(&from).unwrap_or_default();
        for edge_id in &incident {
            if let Some(edge) = self.edges.get_mut(edge_id) {
                if edge.start == from {
                    edge.start = to;
                }
                if edge.end == from {
                    edge.end = to;
                }
            }
        }
        if !incident.is_empty() {
            self.incident.entry(to).or_default().extend(incident);
        }

        let Some(mut vertex) = self.vertexes.remove(&from) else {
            return Ok(());
        };
        self.unindex_labels(from, &vertex.labels);
        vertex.id = to;
        if let Some(existing) = self.vertexes.get_mut(&to) {
            union_adjacency(&mut existing.in_edges, vertex.in_edges);
            union_adjacency(&mut existing.out_edges, vertex.out_edges);
            let added: Vec<String> = vertex
                .labels
                .into_iter()
                .filter(|label| !existing.labels.contains(label))
                .collect();
            existing.labels.extend(added.iter().cloned());
            self.index_labels(to, &added);
        } else {
            self.index_labels(to, &vertex.labels);
            self.vertexes.insert(to, vertex);
        }
        Ok(())
    }

    /// Move an edge to a new id, keeping its position in both endpoints'
    /// adjacency sets. If `to` is already present the `from` copy is dropped.
    pub fn rekey_edge(&mut self, from: EdgeId, to: EdgeId) -> GraphResult<()> {
        if from == to {
            return Ok(());
        }
        if !self.edges.contains_key(&from) {
            return Err(GraphError::EntityNotFound(EntityRef::Edge(from)));
        }
        if self.edges.contains_key(&to) {
            self.delete_edge(from)?;
            return Ok(());
        }
        let Some(mut edge) = self.edges.remove(&from) else {
            return Err(GraphError::EntityNotFound(EntityRef::Edge(from)));
        };
        edge.id = to;

        if let Some(start) = self.vertexes.get_mut(&edge.start) {
            if let Some(bucket) = start.out_edges.get_mut(&edge.edge_type) {
                replace_in_set(bucket, from, to);
            }
        }
        if let Some(end) = self.vertexes.get_mut(&edge.end) {
            if let Some(bucket) = end.in_edges.get_mut(&edge.edge_type) {
                replace_in_set(bucket, from, to);
            }
        }
        for endpoint in [edge.start, edge.end] {
            if let Some(ids) = self.incident.get_mut(&endpoint) {
                replace_in_set(ids, from, to);
            }
        }
        self.edges.insert(to, edge);
        Ok(())
    }

    /// Merge a vertex received from the server or a sibling session.
    ///
    /// Present: labels and adjacency are unioned (adjacency only where a
    /// stored edge backs the entry), properties are overwritten key by key.
    /// Absent: inserted as new.
    pub fn upsert_remote_vertex(&mut self, vertex: Vertex) -> GraphResult<()> {
        let Some(existing) = self.vertexes.get_mut(&vertex.id) else {
            return self.insert_vertex(vertex);
        };

        for (key, value) in vertex.properties {
            existing.properties.insert(key, value);
        }
        for (edge_type, ids) in &vertex.in_edges {
            for edge_id in ids {
                let backed = self
                    .edges
                    .get(edge_id)
                    .is_some_and(|e| e.end == vertex.id && &e.edge_type == edge_type);
                if backed {
                    adjacency_insert(&mut existing.in_edges, edge_type, *edge_id);
                }
            }
        }
        for (edge_type, ids) in &vertex.out_edges {
            for edge_id in ids {
                let backed = self
                    .edges
                    .get(edge_id)
                    .is_some_and(|e| e.start == vertex.id && &e.edge_type == edge_type);
                if backed {
                    adjacency_insert(&mut existing.out_edges, edge_type, *edge_id);
                }
            }
        }
        let added: Vec<String> = vertex
            .labels
            .into_iter()
            .filter(|label| !existing.labels.contains(label))
            .collect();
        existing.labels.extend(added.iter().cloned());
        self.index_labels(vertex.id, &added);
        Ok(())
    }

    /// Merge an edge received from the server or a sibling session.
    /// A changed type or endpoint is applied as delete + insert.
    pub fn upsert_remote_edge(&mut self, edge: Edge) -> GraphResult<()> {
        let Some(existing) = self.edges.get_mut(&edge.id) else {
            return self.insert_edge(edge);
        };
        if existing.edge_type == edge.edge_type
            && existing.start == edge.start
            && existing.end == edge.end
        {
            for (key, value) in edge.properties {
                existing.properties.insert(key, value);
            }
            return Ok(());
        }
        let mut merged = self.delete_edge(edge.id)?;
        merged.edge_type = edge.edge_type;
        merged.start = edge.start;
        merged.end = edge.end;
        for (key, value) in edge.properties {
            merged.properties.insert(key, value);
        }
        self.insert_edge(merged)
    }

    // ---------------------------------------------------------------
    // Integrity
    // ---------------------------------------------------------------

    /// Verify adjacency, label and incident indices against the records.
    pub fn check_integrity(&self) -> GraphResult<()> {
        for vertex in self.vertexes.values() {
            for (edge_type, ids) in &vertex.in_edges {
                for edge_id in ids {
                    match self.edges.get(edge_id) {
                        Some(e) if e.end == vertex.id && &e.edge_type == edge_type => {}
                        _ => {
                            return Err(corruption(format!(
                                "vertex {} IN[{edge_type}] lists edge {edge_id} which does not end there",
                                vertex.id
                            )))
                        }
                    }
                }
            }
            for (edge_type, ids) in &vertex.out_edges {
                for edge_id in ids {
                    match self.edges.get(edge_id) {
                        Some(e) if e.start == vertex.id && &e.edge_type == edge_type => {}
                        _ => {
                            return Err(corruption(format!(
                                "vertex {} OUT[{edge_type}] lists edge {edge_id} which does not start there",
                                vertex.id
                            )))
                        }
                    }
                }
            }
            for label in &vertex.labels {
                let indexed = self
                    .label_index
                    .get(label)
                    .is_some_and(|ids| ids.contains(&vertex.id));
                if !indexed {
                    return Err(corruption(format!(
                        "vertex {} missing from label index `{label}`",
                        vertex.id
                    )));
                }
            }
        }

        for edge in self.edges.values() {
            if let Some(start) = self.vertexes.get(&edge.start) {
                let listed = start
                    .out_edges
                    .get(&edge.edge_type)
                    .is_some_and(|ids| ids.contains(&edge.id));
                if !listed {
                    return Err(corruption(format!(
                        "edge {} missing from OUT of vertex {}",
                        edge.id, edge.start
                    )));
                }
            }
            if let Some(end) = self.vertexes.get(&edge.end) {
                let listed = end
                    .in_edges
                    .get(&edge.edge_type)
                    .is_some_and(|ids| ids.contains(&edge.id));
                if !listed {
                    return Err(corruption(format!(
                        "edge {} missing from IN of vertex {}",
                        edge.id, edge.end
                    )));
                }
            }
            for endpoint in [edge.start, edge.end] {
                let tracked = self
                    .incident
                    .get(&endpoint)
                    .is_some_and(|ids| ids.contains(&edge.id));
                if !tracked {
                    return Err(corruption(format!(
                        "edge {} missing from incident index of {endpoint}",
                        edge.id
                    )));
                }
            }
        }

        for (label, ids) in &self.label_index {
            for id in ids {
                let carries = self.vertexes.get(id).is_some_and(|v| v.has_label(label));
                if !carries {
                    return Err(corruption(format!(
                        "label index `{label}` lists vertex {id} which does not carry it"
                    )));
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Index helpers
    // ---------------------------------------------------------------

    fn index_labels(&mut self, id: VertexId, labels: &[String]) {
        for label in labels {
            self.label_index.entry(label.clone()).or_default().insert(id);
        }
    }

    fn unindex_labels(&mut self, id: VertexId, labels: &[String]) {
        for label in labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.shift_remove(&id);
                if ids.is_empty() {
                    self.label_index.remove(label);
                }
            }
        }
    }

    fn backed_adjacency(&self, id: VertexId, adjacency: &Adjacency, direction: Direction) -> Adjacency {
        let mut backed = Adjacency::new();
        for (edge_type, ids) in adjacency {
            for edge_id in ids {
                let Some(edge) = self.edges.get(edge_id) else {
                    continue;
                };
                let endpoint = match direction {
                    Direction::In => edge.end,
                    Direction::Out => edge.start,
                };
                if endpoint == id && &edge.edge_type == edge_type {
                    adjacency_insert(&mut backed, edge_type, *edge_id);
                }
            }
        }
        backed
    }
}

fn corruption(message: String) -> GraphError {
    GraphError::IndexCorruption(message)
}

fn union_adjacency(into: &mut Adjacency, from: Adjacency) {
    for (edge_type, ids) in from {
        into.entry(edge_type).or_default().extend(ids);
    }
}

fn replace_in_set(set: &mut IndexSet<EdgeId>, from: EdgeId, to: EdgeId) {
    if let Some(index) = set.get_index_of(&from) {
        set.shift_remove(&from);
        if !set.contains(&to) {
            set.shift_insert(index, to);
        }
    }
}
