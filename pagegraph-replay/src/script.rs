//! Edit scripts: a JSON list of operations replayed on one transaction.
//!
//! ```json
//! [
//!   { "op": "insertVertex", "id": -1, "labels": ["Page"], "properties": { "title": "Home" } },
//!   { "op": "insertVertex", "id": -2, "labels": ["Field"] },
//!   { "op": "insertEdge", "id": -1, "type": "Child", "start": -1, "end": -2 },
//!   { "op": "savePoint" },
//!   { "op": "commit" }
//! ]
//! ```
//!
//! Ids are the ones the script author wrote; once a commit confirms them
//! they are translated through the session's id tables.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use pagegraph_collab::{CommitDriver, DriverConfig, DriverError, HubConfig, MemoryRemote, TabHub};
use pagegraph_core::{
    Adjacency, CommitPayload, Edge, EdgeId, GraphSession, Properties, RemoteGraph, SessionConfig, TxnId,
    UndoRequest, Vertex, VertexId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ScriptOp {
    InsertVertex {
        id: VertexId,
        labels: Vec<String>,
        #[serde(default)]
        properties: Properties,
    },
    DeleteVertex {
        id: VertexId,
    },
    Merge {
        id: VertexId,
        properties: Properties,
    },
    Replace {
        id: VertexId,
        properties: Properties,
    },
    AddLabels {
        id: VertexId,
        labels: Vec<String>,
    },
    InsertEdge {
        id: EdgeId,
        #[serde(rename = "type")]
        edge_type: String,
        start: VertexId,
        end: VertexId,
        #[serde(default)]
        properties: Properties,
    },
    DeleteEdge {
        id: EdgeId,
    },
    ReplaceEdge {
        id: EdgeId,
        properties: Properties,
    },
    SavePoint,
    Undo {
        #[serde(default)]
        target: Option<i64>,
    },
    Redo,
    Commit,
}

/// Script errors.
#[derive(Debug)]
pub enum ReplayError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// Operation `index` (zero-based) failed
    Step { index: usize, source: DriverError },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Cannot read script: {e}"),
            Self::Parse(e) => write!(f, "Invalid script: {e}"),
            Self::Step { index, source } => write!(f, "Operation {index} failed: {source}"),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Step { source, .. } => Some(source),
        }
    }
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptOp>, ReplayError> {
    let bytes = std::fs::read(path).map_err(ReplayError::Io)?;
    serde_json::from_slice(&bytes).map_err(ReplayError::Parse)
}

/// Result of a replay: every batch sent and the graph left behind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutput {
    pub commits: Vec<CommitPayload>,
    pub graph: RemoteGraph,
}

/// One session, one transaction, one in-memory remote.
pub struct Replay {
    session: GraphSession,
    driver: CommitDriver<MemoryRemote>,
    remote: Arc<MemoryRemote>,
    txn: TxnId,
}

impl Replay {
    pub async fn new() -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let hub = Arc::new(TabHub::new(Uuid::new_v4(), HubConfig::default()));
        let driver = CommitDriver::new(remote.clone(), hub.join().await, DriverConfig::default());
        let mut session = GraphSession::new(SessionConfig::default());
        let txn = session.begin_transaction();
        Self {
            session,
            driver,
            remote,
            txn,
        }
    }

    pub async fn run(mut self, ops: Vec<ScriptOp>) -> Result<ReplayOutput, ReplayError> {
        let total = ops.len();
        for (index, op) in ops.into_iter().enumerate() {
            debug!("op {index}: {op:?}");
            self.step(op)
                .await
                .map_err(|source| ReplayError::Step { index, source })?;
        }
        let output = self.finish().await;
        info!("replayed {total} operations, {} commits", output.commits.len());
        Ok(output)
    }

    async fn step(&mut self, op: ScriptOp) -> Result<(), DriverError> {
        let txn = self.txn;
        match op {
            ScriptOp::InsertVertex {
                id,
                labels,
                properties,
            } => {
                let vertex = Vertex {
                    id,
                    labels,
                    properties,
                    in_edges: Adjacency::new(),
                    out_edges: Adjacency::new(),
                };
                self.session.insert_vertex(txn, vertex)?;
            }
            ScriptOp::DeleteVertex { id } => {
                let id = self.session.ids().vertex(id);
                self.session.delete_vertex(txn, id)?;
            }
            ScriptOp::Merge { id, properties } => {
                let id = self.session.ids().vertex(id);
                self.session.merge_vertex_properties(txn, id, properties)?;
            }
            ScriptOp::Replace { id, properties } => {
                let id = self.session.ids().vertex(id);
                self.session.replace_vertex_properties(txn, id, properties)?;
            }
            ScriptOp::AddLabels { id, labels } => {
                let id = self.session.ids().vertex(id);
                self.session.add_vertex_labels(txn, id, &labels)?;
            }
            ScriptOp::InsertEdge {
                id,
                edge_type,
                start,
                end,
                properties,
            } => {
                let ids = self.session.ids();
                let mut edge = Edge::new(id, edge_type, ids.vertex(start), ids.vertex(end));
                edge.properties = properties;
                self.session.insert_edge(txn, edge)?;
            }
            ScriptOp::DeleteEdge { id } => {
                let id = self.session.ids().edge(id);
                self.session.delete_edge(txn, id)?;
            }
            ScriptOp::ReplaceEdge { id, properties } => {
                let id = self.session.ids().edge(id);
                self.session.replace_edge_properties(txn, id, properties)?;
            }
            ScriptOp::SavePoint => self.session.save_undo_point(txn)?,
            ScriptOp::Undo { target } => {
                let request = match target {
                    Some(target) => UndoRequest::to(target),
                    None => UndoRequest::default(),
                };
                self.session.undo(txn, request)?;
            }
            ScriptOp::Redo => {
                self.session.redo(txn)?;
            }
            ScriptOp::Commit => {
                self.driver.commit(&mut self.session, txn).await?;
            }
        }
        Ok(())
    }

    async fn finish(self) -> ReplayOutput {
        let mut graph = RemoteGraph::default();
        for vertex in self.session.store().vertexes() {
            graph.vertexes.insert(vertex.id, vertex.clone());
        }
        for edge in self.session.store().edges() {
            graph.edges.insert(edge.id, edge.clone());
        }
        ReplayOutput {
            commits: self.remote.batches().await,
            graph,
        }
    }
}
