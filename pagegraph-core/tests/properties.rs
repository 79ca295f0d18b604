use pagegraph_core::{
    Edge, EdgeId, GraphSession, GraphStore, HistoryMove, Properties, SessionConfig, TxnId,
    UndoRequest, Vertex, VertexId,
};
use proptest::prelude::*;
use serde_json::json;

const LABELS: [&str; 3] = ["Page", "Field", "Layout"];
const EDGE_TYPES: [&str; 2] = ["Child", "Ref"];

#[derive(Debug, Clone)]
enum Operation {
    InsertVertex { slot: i64, label: usize },
    DeleteVertex { slot: i64 },
    Merge { slot: i64, key: String, value: i64 },
    Replace { slot: i64, value: i64 },
    AddLabel { slot: i64, label: usize },
    InsertEdge { slot: i64, from: i64, to: i64, kind: usize },
    DeleteEdge { slot: i64 },
    ReplaceEdge { slot: i64, value: i64 },
    SavePoint,
    Undo,
    Redo,
}

/// Wire bytes of every vertex then every edge, sorted by id. Unlike store
/// equality this sees the order of adjacency sets.
fn encoded(store: &GraphStore) -> Vec<Vec<u8>> {
    let mut vertexes: Vec<&Vertex> = store.vertexes().collect();
    vertexes.sort_by_key(|vertex| vertex.id);
    let mut edges: Vec<&Edge> = store.edges().collect();
    edges.sort_by_key(|edge| edge.id);
    vertexes
        .into_iter()
        .map(|vertex| serde_json::to_vec(vertex).unwrap())
        .chain(edges.into_iter().map(|edge| serde_json::to_vec(edge).unwrap()))
        .collect()
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (1i64..=6, 0usize..3).prop_map(|(slot, label)| Operation::InsertVertex { slot, label }),
        1 => (1i64..=6).prop_map(|slot| Operation::DeleteVertex { slot }),
        2 => (1i64..=6, "[a-c]", 0i64..10).prop_map(|(slot, key, value)| Operation::Merge { slot, key, value }),
        1 => (1i64..=6, 0i64..10).prop_map(|(slot, value)| Operation::Replace { slot, value }),
        1 => (1i64..=6, 0usize..3).prop_map(|(slot, label)| Operation::AddLabel { slot, label }),
        3 => (1i64..=8, 1i64..=6, 1i64..=6, 0usize..2)
            .prop_map(|(slot, from, to, kind)| Operation::InsertEdge { slot, from, to, kind }),
        1 => (1i64..=8).prop_map(|slot| Operation::DeleteEdge { slot }),
        1 => (1i64..=8, 0i64..10).prop_map(|(slot, value)| Operation::ReplaceEdge { slot, value }),
        1 => Just(Operation::SavePoint),
        2 => Just(Operation::Undo),
        1 => Just(Operation::Redo),
    ]
}

fn props(key: &str, value: i64) -> Properties {
    let mut properties = Properties::new();
    properties.insert(key.to_string(), json!(value));
    properties
}

/// Runs one operation; primitive failures (missing ids, duplicates) are
/// expected and leave the session untouched.
fn run(session: &mut GraphSession, txn: TxnId, op: Operation) {
    let v = |slot: i64| VertexId(-slot);
    let e = |slot: i64| EdgeId(-slot);
    let _ = match op {
        Operation::InsertVertex { slot, label } => session
            .insert_vertex(txn, Vertex::new(v(slot), LABELS[label]))
            .map(drop),
        Operation::DeleteVertex { slot } => session.delete_vertex(txn, v(slot)).map(drop),
        Operation::Merge { slot, key, value } => {
            session.merge_vertex_properties(txn, v(slot), props(&key, value))
        }
        Operation::Replace { slot, value } => {
            session.replace_vertex_properties(txn, v(slot), props("z", value))
        }
        Operation::AddLabel { slot, label } => {
            session.add_vertex_labels(txn, v(slot), &[LABELS[label].to_string()])
        }
        Operation::InsertEdge { slot, from, to, kind } => session
            .insert_edge(txn, Edge::new(e(slot), EDGE_TYPES[kind], v(from), v(to)))
            .map(drop),
        Operation::DeleteEdge { slot } => session.delete_edge(txn, e(slot)).map(drop),
        Operation::ReplaceEdge { slot, value } => {
            session.replace_edge_properties(txn, e(slot), props("order", value))
        }
        Operation::SavePoint => session.save_undo_point(txn),
        Operation::Undo => session.undo(txn, UndoRequest::default()).map(drop),
        Operation::Redo => session.redo(txn).map(drop),
    };
}

proptest! {
    #[test]
    fn prop_indices_hold_after_any_sequence(ops in prop::collection::vec(arb_operation(), 1..80)) {
        let mut session = GraphSession::new(SessionConfig::for_testing());
        let txn = session.begin_transaction();
        for op in ops {
            run(&mut session, txn, op);
            prop_assert!(session.store().check_integrity().is_ok());
            prop_assert!(session.transaction(txn).unwrap().error().is_none());
        }
    }

    #[test]
    fn prop_undo_then_redo_restores_store(
        ops in prop::collection::vec(arb_operation(), 1..60),
        back in 0usize..60,
    ) {
        let mut session = GraphSession::new(SessionConfig::for_testing());
        let txn = session.begin_transaction();
        for op in ops {
            run(&mut session, txn, op);
        }
        // Record a fresh step so the log ends at the current position.
        session
            .insert_vertex(txn, Vertex::new(VertexId(-100), "Marker"))
            .unwrap();
        let snapshot = session.store().clone();
        let active = session.transaction(txn).unwrap().active_undo_index();
        let target = (active - back as i64).max(-1);

        if target < active {
            let moved = session.undo(txn, UndoRequest::to(target)).unwrap();
            prop_assert_eq!(moved, HistoryMove::Moved { from: active, to: target });
        }
        while session.redo(txn).unwrap().moved() {}

        prop_assert_eq!(session.transaction(txn).unwrap().active_undo_index(), active);
        prop_assert_eq!(session.store(), &snapshot);
        prop_assert_eq!(encoded(session.store()), encoded(&snapshot));
    }
}

#[test]
fn test_page_builder_session() {
    let mut session = GraphSession::new(SessionConfig::for_testing());
    let txn = session.begin_transaction();

    let page = session.new_vertex_id();
    session
        .insert_vertex(txn, Vertex::new(page, "Page").with_property("title", "Signup"))
        .unwrap();
    session.save_undo_point(txn).unwrap();

    let field = session.new_vertex_id();
    session.insert_vertex(txn, Vertex::new(field, "Field")).unwrap();
    let child = session.new_edge_id();
    session
        .insert_edge(txn, Edge::new(child, "Child", page, field))
        .unwrap();
    session.save_undo_point(txn).unwrap();

    assert_eq!(session.store().out_vertices(page, "Child")[0].id, field);
    assert_eq!(session.store().vertices_with_label("Field").len(), 1);

    session.undo(txn, UndoRequest::default()).unwrap();
    assert!(session.store().out_vertices(page, "Child").is_empty());
    assert_eq!(session.store().vertex_count(), 1);

    session.redo(txn).unwrap();
    assert_eq!(session.store().in_vertices(field, "Child")[0].id, page);

    let payload = session.commit(txn).unwrap().unwrap();
    let actions: Vec<_> = payload.transactions.iter().map(|m| m.action()).collect();
    assert_eq!(actions, vec!["insert", "insert", "insertEdge"]);
}
