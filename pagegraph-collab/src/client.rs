//! Commit driver connecting a `GraphSession` to the remote database and to
//! its sibling sessions.
//!
//! Provides:
//! - Commit round-trips, one attempt per call
//! - Relay of confirmed changes over the tab hub
//! - Application of changes relayed by siblings
//!
//! ```text
//!  GraphSession ──commit()──► CommitPayload ──► RemoteGraphDb
//!       ▲                                            │
//!       └──apply_commit_response() ◄── RemoteResponse┘
//!       │
//!       └──report.updates() ──► TabLink ──► sibling sessions
//! ```

use std::sync::Arc;

use log::{debug, info, warn};
use pagegraph_core::{EdgeId, GraphError, GraphSession, MergeReport, TxnError, TxnId, VertexId};

use crate::broadcast::TabLink;
use crate::protocol::ProtocolError;
use crate::remote::RemoteGraphDb;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Relay confirmed changes to sibling sessions. Default: true.
    pub broadcast: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { broadcast: true }
    }
}

/// Driver errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// The session refused the operation, or the server rejected the batch
    Graph(GraphError),
    /// The batch never reached a verdict
    Protocol(ProtocolError),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "Graph error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            Self::Protocol(e) => Some(e),
        }
    }
}

impl From<GraphError> for DriverError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<ProtocolError> for DriverError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Drives commits for one session.
pub struct CommitDriver<D: RemoteGraphDb> {
    remote: Arc<D>,
    link: TabLink,
    config: DriverConfig,
}

impl<D: RemoteGraphDb> CommitDriver<D> {
    pub fn new(remote: Arc<D>, link: TabLink, config: DriverConfig) -> Self {
        Self {
            remote,
            link,
            config,
        }
    }

    pub fn link(&self) -> &TabLink {
        &self.link
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Commit `txn` and merge the server's answer. `Ok(None)` when there was
    /// nothing to send.
    ///
    /// One round-trip per call. Whether the batch failed in transport or was
    /// rejected, it is rolled back into the transaction, which is left in
    /// error status until the caller commits again.
    pub async fn commit(
        &mut self,
        session: &mut GraphSession,
        txn: TxnId,
    ) -> Result<Option<MergeReport>, DriverError> {
        let Some(payload) = session.commit(txn)? else {
            return Ok(None);
        };
        debug!("sending {} mutations for transaction {txn}", payload.len());

        let response = match self.remote.execute(payload).await {
            Ok(response) => response,
            Err(err) => {
                warn!("transaction {txn} not delivered: {err}");
                session.fail_commit(txn, TxnError::new("transport_error", err.to_string()))?;
                return Err(err.into());
            }
        };

        let deleted_edges = response.graph.deleted_edges.clone();
        let deleted_vertexes = response.graph.deleted_vertexes.clone();
        let mut report = session.apply_commit_response(txn, response)?;
        // Reverts were already applied locally; siblings still need them.
        confirm_deletions(session, &mut report, deleted_edges, deleted_vertexes);
        if self.config.broadcast {
            self.relay(session, &report).await?;
        }
        info!("transaction {txn} committed");
        Ok(Some(report))
    }

    /// Apply every buffered change relayed by sibling sessions. Returns the
    /// number applied.
    pub fn pump(&mut self, session: &mut GraphSession) -> Result<usize, DriverError> {
        let mut applied = 0;
        while let Some(message) = self.link.try_next()? {
            session.apply_remote_update(message.update)?;
            applied += 1;
        }
        if applied > 0 {
            debug!("applied {applied} relayed updates on {}", self.link.tag());
        }
        Ok(applied)
    }

    async fn relay(&self, session: &GraphSession, report: &MergeReport) -> Result<(), ProtocolError> {
        for update in report.updates(session.store()) {
            self.link.publish(update).await?;
        }
        Ok(())
    }
}

fn confirm_deletions(
    session: &GraphSession,
    report: &mut MergeReport,
    edges: Vec<EdgeId>,
    vertexes: Vec<VertexId>,
) {
    for id in edges {
        let id = session.ids().edge(id);
        if !report.deleted_edges.contains(&id) {
            report.deleted_edges.push(id);
        }
    }
    for id in vertexes {
        let id = session.ids().vertex(id);
        if !report.deleted_vertexes.contains(&id) {
            report.deleted_vertexes.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{HubConfig, TabHub};
    use crate::remote::MemoryRemote;
    use pagegraph_core::{SessionConfig, TxnStatus, Vertex};
    use uuid::Uuid;

    async fn driver<D: RemoteGraphDb>(remote: Arc<D>) -> CommitDriver<D> {
        let hub = Arc::new(TabHub::new(Uuid::new_v4(), HubConfig::for_testing()));
        CommitDriver::new(remote, hub.join().await, DriverConfig::default())
    }

    fn session_with_page() -> (GraphSession, TxnId, VertexId) {
        let mut session = GraphSession::new(SessionConfig::for_testing());
        let txn = session.begin_transaction();
        let page = session.new_vertex_id();
        session
            .insert_vertex(txn, Vertex::new(page, "Page").with_property("title", "Home"))
            .unwrap();
        (session, txn, page)
    }

    #[tokio::test]
    async fn test_commit_confirms_ids() {
        let remote = Arc::new(MemoryRemote::new());
        let mut driver = driver(remote.clone()).await;
        let (mut session, txn, page) = session_with_page();

        let report = driver.commit(&mut session, txn).await.unwrap().unwrap();

        assert_eq!(report.rekeyed_vertexes, vec![(page, VertexId(1))]);
        assert_eq!(session.ids().vertex(page), VertexId(1));
        assert!(session.store().contains_vertex(VertexId(1)));
        assert_eq!(session.transaction(txn).unwrap().status(), TxnStatus::Committed);
        assert_eq!(remote.snapshot().await.vertex_count(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_commit() {
        let mut driver = driver(Arc::new(MemoryRemote::new())).await;
        let mut session = GraphSession::new(SessionConfig::for_testing());
        let txn = session.begin_transaction();
        assert_eq!(driver.commit(&mut session, txn).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transport_failure_stops_in_error() {
        let remote = Arc::new(MemoryRemote::new());
        remote.disconnect_next().await;
        let mut driver = driver(remote.clone()).await;
        let (mut session, txn, page) = session_with_page();

        let err = driver.commit(&mut session, txn).await.unwrap_err();
        assert_eq!(err, DriverError::Protocol(ProtocolError::ConnectionClosed));
        let detail = session.transaction(txn).unwrap();
        assert_eq!(detail.status(), TxnStatus::Error);
        assert_eq!(detail.error().unwrap().code, "transport_error");
        assert!(detail.has_uncommitted());
        assert!(session.store().contains_vertex(page));
        assert_eq!(remote.stats().await.batches_applied, 0);

        // Only an explicit commit sends the batch again.
        let report = driver.commit(&mut session, txn).await.unwrap().unwrap();
        assert_eq!(report.vertexes, vec![VertexId(1)]);
        assert_eq!(session.transaction(txn).unwrap().status(), TxnStatus::Committed);
        assert_eq!(remote.stats().await.batches_applied, 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next("quota exceeded").await;
        let mut driver = driver(remote.clone()).await;
        let (mut session, txn, _) = session_with_page();

        let err = driver.commit(&mut session, txn).await.unwrap_err();
        assert_eq!(
            err,
            DriverError::Graph(GraphError::CommitError("quota exceeded".into()))
        );
        let detail = session.transaction(txn).unwrap();
        assert_eq!(detail.status(), TxnStatus::Error);
        assert_eq!(detail.error().unwrap().code, "commit_error");
        assert_eq!(remote.stats().await.batches_rejected, 1);

        // Same work goes out again on the next attempt.
        let report = driver.commit(&mut session, txn).await.unwrap().unwrap();
        assert_eq!(report.vertexes, vec![VertexId(1)]);
        assert_eq!(session.transaction(txn).unwrap().status(), TxnStatus::Committed);
    }

    #[tokio::test]
    async fn test_pump_applies_sibling_changes() {
        let remote = Arc::new(MemoryRemote::new());
        let hub = Arc::new(TabHub::new(Uuid::new_v4(), HubConfig::default()));
        let mut writer = CommitDriver::new(remote.clone(), hub.join().await, DriverConfig::default());
        let mut reader = CommitDriver::new(remote, hub.join().await, DriverConfig::default());

        let (mut session, txn, _) = session_with_page();
        writer.commit(&mut session, txn).await.unwrap();

        let mut sibling = GraphSession::new(SessionConfig::for_testing());
        assert_eq!(reader.pump(&mut sibling).unwrap(), 1);
        assert_eq!(
            sibling.store().vertex(VertexId(1)).unwrap().properties["title"],
            "Home"
        );
        assert_eq!(writer.pump(&mut session).unwrap(), 0);
    }
}
