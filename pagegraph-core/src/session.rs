//! `GraphSession`: the single entry point owning the store, the
//! transaction table, the id tables and the event channel.
//!
//! ```text
//!   edit(txn, …) ──► GraphStore primitive ──► Step recorded on txn
//!                                         └─► GraphEvent published
//!   commit(txn)  ──► CommitPayload ──► (transport) ──► apply_commit_response
//!                                                        └─► MergeReport
//! ```
//!
//! Transaction id `0` ([`TxnId::IMMEDIATE`]) applies a mutation directly
//! without recording anything.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use crate::commit::{self, CommitPayload};
use crate::config::SessionConfig;
use crate::error::{GraphError, GraphResult, TxnError};
use crate::events::{EventBus, GraphEvent};
use crate::history::{self, HistoryMove, UndoRequest};
use crate::idmap::IdRemap;
use crate::model::{Edge, EdgeId, EntityRef, Properties, Vertex, VertexId};
use crate::step::Step;
use crate::store::GraphStore;
use crate::sync::{self, MergeReport, RemoteGraph, RemoteResponse, RemoteUpdate};
use crate::transaction::{TransactionDetail, TxnId, TxnStatus, NO_STEP};

#[derive(Debug)]
pub struct GraphSession {
    config: SessionConfig,
    store: GraphStore,
    transactions: BTreeMap<TxnId, TransactionDetail>,
    ids: IdRemap,
    next_txn: u64,
    next_temp_vertex: i64,
    next_temp_edge: i64,
    events: EventBus,
}

impl Default for GraphSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl GraphSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            next_temp_vertex: config.first_temp_vertex_id,
            next_temp_edge: config.first_temp_edge_id,
            config,
            store: GraphStore::new(),
            transactions: BTreeMap::new(),
            ids: IdRemap::new(),
            next_txn: 1,
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn ids(&self) -> &IdRemap {
        &self.ids
    }

    pub fn transaction(&self, txn: TxnId) -> Option<&TransactionDetail> {
        self.transactions.get(&txn)
    }

    pub fn transactions(&self) -> impl Iterator<Item = (TxnId, &TransactionDetail)> {
        self.transactions.iter().map(|(id, detail)| (*id, detail))
    }

    pub fn subscribe(&mut self) -> Receiver<GraphEvent> {
        self.events.subscribe()
    }

    pub fn begin_transaction(&mut self) -> TxnId {
        let txn = TxnId(self.next_txn);
        self.next_txn += 1;
        self.transactions.insert(txn, TransactionDetail::new());
        debug!("begin transaction {txn}");
        txn
    }

    /// Next temporary vertex id.
    pub fn new_vertex_id(&mut self) -> VertexId {
        let id = VertexId(self.next_temp_vertex);
        self.next_temp_vertex -= 1;
        id
    }

    /// Next temporary edge id.
    pub fn new_edge_id(&mut self) -> EdgeId {
        let id = EdgeId(self.next_temp_edge);
        self.next_temp_edge -= 1;
        id
    }

    // ---------------------------------------------------------------
    // Vertex mutations
    // ---------------------------------------------------------------

    pub fn insert_vertex(&mut self, txn: TxnId, vertex: Vertex) -> GraphResult<VertexId> {
        self.check_transaction(txn)?;
        let id = vertex.id;
        let step = Step::Insert(vertex.detached());
        self.store.insert_vertex(vertex)?;
        self.events.publish(GraphEvent::VertexUpserted(id));
        self.record(txn, step);
        Ok(id)
    }

    /// Delete a vertex. With `cascade_vertex_delete` its locally present
    /// edges are deleted first, each as its own step.
    pub fn delete_vertex(&mut self, txn: TxnId, id: VertexId) -> GraphResult<Vertex> {
        self.check_transaction(txn)?;
        if !self.store.contains_vertex(id) {
            return Err(GraphError::EntityNotFound(EntityRef::Vertex(id)));
        }
        if self.config.cascade_vertex_delete {
            for edge_id in self.store.incident_edges(id) {
                self.delete_edge(txn, edge_id)?;
            }
        }
        let removed = self.store.delete_vertex(id)?;
        self.events.publish(GraphEvent::VertexRemoved(id));
        self.record(txn, Step::DeleteVertex(removed.detached()));
        Ok(removed)
    }

    /// Shallow property union.
    pub fn merge_vertex_properties(
        &mut self,
        txn: TxnId,
        id: VertexId,
        properties: Properties,
    ) -> GraphResult<()> {
        self.check_transaction(txn)?;
        let original = self.store.merge_vertex_properties(id, &properties)?;
        self.events.publish(GraphEvent::VertexUpserted(id));
        let data = patch(id, Vec::new(), properties);
        self.record(txn, Step::Merge { data, original });
        Ok(())
    }

    /// Full property replacement; labels are kept.
    pub fn replace_vertex_properties(
        &mut self,
        txn: TxnId,
        id: VertexId,
        properties: Properties,
    ) -> GraphResult<()> {
        self.check_transaction(txn)?;
        let original = self.store.replace_vertex_properties(id, properties.clone())?;
        self.events.publish(GraphEvent::VertexUpserted(id));
        let data = patch(id, original.labels.clone(), properties);
        self.record(txn, Step::Replace { data, original });
        Ok(())
    }

    pub fn add_vertex_labels(&mut self, txn: TxnId, id: VertexId, labels: &[String]) -> GraphResult<()> {
        self.check_transaction(txn)?;
        let original = self.store.add_vertex_labels(id, labels)?;
        self.events.publish(GraphEvent::VertexUpserted(id));
        let data = patch(id, labels.to_vec(), Properties::new());
        self.record(txn, Step::Merge { data, original });
        Ok(())
    }

    /// Replace the label list; properties are kept.
    pub fn set_vertex_labels(&mut self, txn: TxnId, id: VertexId, labels: Vec<String>) -> GraphResult<()> {
        self.check_transaction(txn)?;
        let original = self.store.set_vertex_labels(id, labels.clone())?;
        self.events.publish(GraphEvent::VertexUpserted(id));
        let data = patch(id, labels, original.properties.clone());
        self.record(txn, Step::Replace { data, original });
        Ok(())
    }

    // ---------------------------------------------------------------
    // Edge mutations
    // ---------------------------------------------------------------

    pub fn insert_edge(&mut self, txn: TxnId, edge: Edge) -> GraphResult<EdgeId> {
        self.check_transaction(txn)?;
        let id = edge.id;
        self.store.insert_edge(edge.clone())?;
        self.events.publish(GraphEvent::EdgeUpserted(id));
        self.record(txn, Step::InsertEdge(edge));
        Ok(id)
    }

    pub fn delete_edge(&mut self, txn: TxnId, id: EdgeId) -> GraphResult<Edge> {
        self.check_transaction(txn)?;
        let removed = self.store.delete_edge(id)?;
        self.events.publish(GraphEvent::EdgeRemoved(id));
        self.record(txn, Step::DeleteEdge(removed.clone()));
        Ok(removed)
    }

    pub fn replace_edge_properties(
        &mut self,
        txn: TxnId,
        id: EdgeId,
        properties: Properties,
    ) -> GraphResult<()> {
        self.check_transaction(txn)?;
        let original = self.store.replace_edge_properties(id, properties.clone())?;
        self.events.publish(GraphEvent::EdgeUpserted(id));
        let data = Edge {
            properties,
            ..original.clone()
        };
        self.record(txn, Step::ReplaceEdge { data, original });
        Ok(())
    }

    // ---------------------------------------------------------------
    // History
    // ---------------------------------------------------------------

    pub fn save_undo_point(&mut self, txn: TxnId) -> GraphResult<()> {
        self.detail_mut(txn)?.save_undo_point();
        Ok(())
    }

    pub fn set_undo_floor(&mut self, txn: TxnId) -> GraphResult<()> {
        self.detail_mut(txn)?.set_undo_floor();
        Ok(())
    }

    pub fn undo(&mut self, txn: TxnId, request: UndoRequest) -> GraphResult<HistoryMove> {
        let detail = self
            .transactions
            .get_mut(&txn)
            .ok_or(GraphError::InvalidTransaction(txn))?;
        let before = detail.status();
        let mut touched = Vec::new();
        let result = history::undo(detail, &mut self.store, &self.ids, request, |step| {
            touched.push(step.entity())
        });
        self.after_replay(txn, before, touched);
        let moved = result?;
        self.verify()?;
        Ok(moved)
    }

    pub fn redo(&mut self, txn: TxnId) -> GraphResult<HistoryMove> {
        let detail = self
            .transactions
            .get_mut(&txn)
            .ok_or(GraphError::InvalidTransaction(txn))?;
        let before = detail.status();
        let mut touched = Vec::new();
        let result = history::redo(detail, &mut self.store, &self.ids, |step| {
            touched.push(step.entity())
        });
        self.after_replay(txn, before, touched);
        let moved = result?;
        self.verify()?;
        Ok(moved)
    }

    // ---------------------------------------------------------------
    // Commit and sync
    // ---------------------------------------------------------------

    /// Compile everything the server has not seen into a batch and mark it
    /// as sent. `None` when there is nothing to send.
    pub fn commit(&mut self, txn: TxnId) -> GraphResult<Option<CommitPayload>> {
        let detail = self
            .transactions
            .get_mut(&txn)
            .ok_or(GraphError::InvalidTransaction(txn))?;
        if !detail.has_uncommitted() {
            return Ok(None);
        }
        let before = detail.status();
        let mutations = commit::compile(detail, &self.ids);
        if mutations.is_empty() {
            detail.settle_without_send();
            debug!("transaction {txn} compiled to nothing");
            self.status_changed(txn, before);
            return Ok(None);
        }
        detail.begin_commit();
        info!("commit transaction {txn}: {} mutations", mutations.len());
        self.status_changed(txn, before);
        Ok(Some(CommitPayload::new(txn, mutations, &self.ids)))
    }

    /// Merge the server's answer to a batch from `commit`. A response
    /// carrying an error is treated as [`GraphSession::fail_commit`].
    pub fn apply_commit_response(
        &mut self,
        txn: TxnId,
        response: RemoteResponse,
    ) -> GraphResult<MergeReport> {
        if let Some(message) = response.error {
            let error = TxnError::new("commit_error", message.clone())
                .with_cause(Value::String(message.clone()));
            self.fail_commit(txn, error)?;
            return Err(GraphError::CommitError(message));
        }

        let report = sync::merge_remote_graph(&mut self.store, &mut self.ids, response.graph)?;
        self.publish_report(&report);
        if let Some(detail) = self.transactions.get_mut(&txn) {
            let before = detail.status();
            detail.finish_commit();
            self.status_changed(txn, before);
        }
        self.verify()?;
        Ok(report)
    }

    /// Mark the batch in flight for `txn` as rejected. The pre-commit
    /// bookkeeping is restored so the next `commit` sends the same work.
    pub fn fail_commit(&mut self, txn: TxnId, error: TxnError) -> GraphResult<()> {
        let detail = self.detail_mut(txn)?;
        warn!("commit of transaction {txn} failed: {}", error.message);
        let before = detail.status();
        detail.abort_commit(error);
        self.status_changed(txn, before);
        Ok(())
    }

    /// Roll back every step of `txn` and drop the transaction. Returns the
    /// batch undoing whatever the server had already accepted.
    pub fn discard_transaction(&mut self, txn: TxnId) -> GraphResult<Option<CommitPayload>> {
        let request = UndoRequest {
            target: Some(NO_STEP),
            discard: true,
            ignore_floor: true,
        };
        self.undo(txn, request)?;
        let detail = self
            .transactions
            .get_mut(&txn)
            .ok_or(GraphError::InvalidTransaction(txn))?;
        detail.truncate_after(NO_STEP);
        let mutations = commit::compile(detail, &self.ids);
        self.transactions.remove(&txn);
        info!("discarded transaction {txn}");
        if mutations.is_empty() {
            return Ok(None);
        }
        Ok(Some(CommitPayload::new(txn, mutations, &self.ids)))
    }

    /// Merge a graph fragment received outside any commit (initial load,
    /// query results).
    pub fn merge_remote_graph(&mut self, graph: RemoteGraph) -> GraphResult<MergeReport> {
        let report = sync::merge_remote_graph(&mut self.store, &mut self.ids, graph)?;
        self.publish_report(&report);
        self.verify()?;
        Ok(report)
    }

    /// Apply a change relayed from a sibling session.
    pub fn apply_remote_update(&mut self, update: RemoteUpdate) -> GraphResult<MergeReport> {
        let report = sync::apply_remote_update(&mut self.store, &self.ids, update)?;
        self.publish_report(&report);
        self.verify()?;
        Ok(report)
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    /// Unknown ids are accepted under `auto_begin`; the transaction itself
    /// is created by the first step that succeeds.
    fn check_transaction(&self, txn: TxnId) -> GraphResult<()> {
        if txn.is_immediate() || self.config.auto_begin || self.transactions.contains_key(&txn) {
            return Ok(());
        }
        Err(GraphError::InvalidTransaction(txn))
    }

    fn detail_mut(&mut self, txn: TxnId) -> GraphResult<&mut TransactionDetail> {
        self.transactions
            .get_mut(&txn)
            .ok_or(GraphError::InvalidTransaction(txn))
    }

    fn record(&mut self, txn: TxnId, step: Step) {
        if txn.is_immediate() {
            return;
        }
        if !self.transactions.contains_key(&txn) {
            debug!("auto-begin transaction {txn}");
            self.next_txn = self.next_txn.max(txn.0 + 1);
        }
        let detail = self.transactions.entry(txn).or_default();
        let before = detail.status();
        detail.record_step(step);
        self.status_changed(txn, before);
    }

    fn status_changed(&mut self, txn: TxnId, before: TxnStatus) {
        let Some(status) = self.transactions.get(&txn).map(TransactionDetail::status) else {
            return;
        };
        if status != before {
            self.events
                .publish(GraphEvent::TransactionChanged { txn, status });
        }
    }

    fn after_replay(&mut self, txn: TxnId, before: TxnStatus, touched: Vec<EntityRef>) {
        for entity in touched {
            let event = match entity {
                EntityRef::Vertex(id) if self.store.contains_vertex(id) => GraphEvent::VertexUpserted(id),
                EntityRef::Vertex(id) => GraphEvent::VertexRemoved(id),
                EntityRef::Edge(id) if self.store.contains_edge(id) => GraphEvent::EdgeUpserted(id),
                EntityRef::Edge(id) => GraphEvent::EdgeRemoved(id),
            };
            self.events.publish(event);
        }
        self.status_changed(txn, before);
    }

    fn publish_report(&mut self, report: &MergeReport) {
        for (from, to) in &report.rekeyed_vertexes {
            self.events
                .publish(GraphEvent::VertexRekeyed { from: *from, to: *to });
        }
        for (from, to) in &report.rekeyed_edges {
            self.events
                .publish(GraphEvent::EdgeRekeyed { from: *from, to: *to });
        }
        for id in &report.vertexes {
            self.events.publish(GraphEvent::VertexUpserted(*id));
        }
        for id in &report.edges {
            self.events.publish(GraphEvent::EdgeUpserted(*id));
        }
        for id in &report.deleted_edges {
            self.events.publish(GraphEvent::EdgeRemoved(*id));
        }
        for id in &report.deleted_vertexes {
            self.events.publish(GraphEvent::VertexRemoved(*id));
        }
    }

    fn verify(&self) -> GraphResult<()> {
        if self.config.verify_indices {
            self.store.check_integrity()?;
        }
        Ok(())
    }
}

fn patch(id: VertexId, labels: Vec<String>, properties: Properties) -> Vertex {
    Vertex {
        id,
        labels,
        properties,
        in_edges: Default::default(),
        out_edges: Default::default(),
    }
}
