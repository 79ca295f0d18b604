//! End-to-end tests: sessions committing against one in-memory remote and
//! relaying confirmed changes through a shared hub.

use std::sync::Arc;

use pagegraph_collab::{
    CommitDriver, DriverConfig, DriverError, HubConfig, HubRegistry, MemoryRemote, RemoteGraphDb,
};
use pagegraph_core::{
    Edge, GraphError, GraphSession, SessionConfig, TxnStatus, UndoRequest, Vertex, VertexId,
};
use serde_json::json;
use uuid::Uuid;

struct Tab {
    session: GraphSession,
    driver: CommitDriver<MemoryRemote>,
}

async fn open_tabs(remote: &Arc<MemoryRemote>, count: usize) -> Vec<Tab> {
    let registry = HubRegistry::new(HubConfig::default());
    let hub = registry.get_or_create(Uuid::new_v4()).await;
    let mut tabs = Vec::new();
    for _ in 0..count {
        let mut session = GraphSession::new(SessionConfig::for_testing());
        session.merge_remote_graph(remote.export().await).unwrap();
        let driver = CommitDriver::new(remote.clone(), hub.join().await, DriverConfig::default());
        tabs.push(Tab { session, driver });
    }
    tabs
}

#[tokio::test]
async fn test_commit_reaches_sibling_tab() {
    let remote = Arc::new(MemoryRemote::new());
    let mut tabs = open_tabs(&remote, 2).await;

    let Tab { session, driver } = &mut tabs[0];
    let txn = session.begin_transaction();
    let page = session.new_vertex_id();
    let field = session.new_vertex_id();
    session.insert_vertex(txn, Vertex::new(page, "Page")).unwrap();
    session
        .insert_vertex(txn, Vertex::new(field, "Field").with_property("label", "Email"))
        .unwrap();
    let edge = session.new_edge_id();
    session
        .insert_edge(txn, Edge::new(edge, "Child", page, field))
        .unwrap();
    driver.commit(session, txn).await.unwrap();

    let Tab { session, driver } = &mut tabs[1];
    assert_eq!(driver.pump(session).unwrap(), 3);
    let children = session.store().out_vertices(VertexId(1), "Child");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, VertexId(2));
    assert_eq!(children[0].properties["label"], "Email");
    assert!(session.store().check_integrity().is_ok());
}

#[tokio::test]
async fn test_undo_after_commit_is_sent_as_revert() {
    let remote = Arc::new(MemoryRemote::new());
    let mut tabs = open_tabs(&remote, 2).await;

    let Tab { session, driver } = &mut tabs[0];
    let txn = session.begin_transaction();
    let page = session.new_vertex_id();
    session
        .insert_vertex(txn, Vertex::new(page, "Page").with_property("title", "Draft"))
        .unwrap();
    driver.commit(session, txn).await.unwrap();

    session.undo(txn, UndoRequest::default()).unwrap();
    assert_eq!(session.transaction(txn).unwrap().status(), TxnStatus::Reverted);
    let report = driver.commit(session, txn).await.unwrap().unwrap();
    assert_eq!(report.deleted_vertexes, vec![VertexId(1)]);
    assert_eq!(remote.snapshot().await.vertex_count(), 0);

    let Tab { session, driver } = &mut tabs[1];
    driver.pump(session).unwrap();
    assert_eq!(session.store().vertex_count(), 0);
}

#[tokio::test]
async fn test_rejected_commit_then_retry() {
    let remote = Arc::new(MemoryRemote::new());
    let mut tabs = open_tabs(&remote, 1).await;
    let Tab { session, driver } = &mut tabs[0];

    let txn = session.begin_transaction();
    let page = session.new_vertex_id();
    session.insert_vertex(txn, Vertex::new(page, "Page")).unwrap();

    remote.fail_next("validation failed").await;
    let err = driver.commit(session, txn).await.unwrap_err();
    assert!(matches!(err, DriverError::Graph(GraphError::CommitError(_))));
    assert_eq!(session.transaction(txn).unwrap().status(), TxnStatus::Error);
    assert!(session.store().contains_vertex(page));

    session
        .merge_vertex_properties(txn, page, [("title".to_string(), json!("Home"))].into())
        .unwrap();
    driver.commit(session, txn).await.unwrap();

    let authority = remote.snapshot().await;
    assert_eq!(authority.vertex(VertexId(1)).unwrap().properties["title"], "Home");
    assert_eq!(session.ids().vertex(page), VertexId(1));
    assert_eq!(session.transaction(txn).unwrap().status(), TxnStatus::Committed);
}

#[tokio::test]
async fn test_discard_reverts_accepted_work() {
    let remote = Arc::new(MemoryRemote::new());
    let mut tabs = open_tabs(&remote, 1).await;
    let Tab { session, driver } = &mut tabs[0];

    let txn = session.begin_transaction();
    let page = session.new_vertex_id();
    session.insert_vertex(txn, Vertex::new(page, "Page")).unwrap();
    driver.commit(session, txn).await.unwrap();
    session
        .merge_vertex_properties(txn, VertexId(1), [("title".to_string(), json!("Unsaved"))].into())
        .unwrap();

    let payload = session.discard_transaction(txn).unwrap().unwrap();
    assert_eq!(payload.transactions.len(), 1);
    let response = remote.execute(payload).await.unwrap();
    assert!(response.error.is_none());
    assert_eq!(remote.snapshot().await.vertex_count(), 0);
    assert_eq!(session.store().vertex_count(), 0);
    assert!(session.transaction(txn).is_none());
}

#[tokio::test]
async fn test_late_tab_loads_committed_graph() {
    let remote = Arc::new(MemoryRemote::new());
    let mut tabs = open_tabs(&remote, 1).await;
    let Tab { session, driver } = &mut tabs[0];
    let txn = session.begin_transaction();
    let page = session.new_vertex_id();
    let layout = session.new_vertex_id();
    session.insert_vertex(txn, Vertex::new(page, "Page")).unwrap();
    session.insert_vertex(txn, Vertex::new(layout, "Layout")).unwrap();
    let edge = session.new_edge_id();
    session
        .insert_edge(txn, Edge::new(edge, "Uses", page, layout))
        .unwrap();
    driver.commit(session, txn).await.unwrap();

    let late = open_tabs(&remote, 1).await;
    let store = late[0].session.store();
    assert_eq!(store.vertex_count(), 2);
    assert_eq!(store.edge_count(), 1);
    assert_eq!(store.out_vertices(VertexId(1), "Uses")[0].id, VertexId(2));
    assert!(store.check_integrity().is_ok());
}
