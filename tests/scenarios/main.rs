//! End-to-end scenarios across the whole stack: collections, transactions,
//! compiled live queries, and the sync protocol.

#[path = "../common/mod.rs"]
mod common;

use common::{key, local_collection, todo, BatchLog, ScriptedDriver};
use rillet::{
    agg, col, create_live_query_collection, eq, lit, ChangeOp, Collection, CollectionConfig,
    CollectionStatus, GcConfig, JoinType, LiveQueryConfig, OrderBySpec, PersistHandler,
    QueryBuilder, RilletError, Value, Watchable, WriteOp, ORDER_INDEX_FIELD,
};
use std::sync::Arc;

fn pending_todos_live(todos: &Collection) -> Collection {
    let query = QueryBuilder::from("todos", "t")
        .where_(eq(col("t.completed"), lit(false)))
        .select([
            ("id", col("t.id").into()),
            ("text", col("t.text").into()),
            ("completed", col("t.completed").into()),
        ])
        .build();
    let live = create_live_query_collection(
        LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
        &[todos.clone()],
    )
    .unwrap();
    live.preload().unwrap();
    live
}

#[test]
fn scenario_todo_add_and_toggle() {
    common::init_tracing();
    let todos = local_collection("todos");
    let live = pending_todos_live(&todos);
    let log = BatchLog::attach(&live);

    todos.insert(todo(1, "a", false)).unwrap();
    assert_eq!(live.len(), 1);
    let row = live.find_one().unwrap();
    assert_eq!(row.field("id"), Some(&Value::Int(1)));
    assert_eq!(row.field("completed"), Some(&Value::Bool(false)));

    todos
        .update(&key(1), |draft| {
            if let Some(map) = draft.as_map_mut() {
                map.insert("completed".to_string(), Value::Bool(true));
            }
        })
        .unwrap();
    assert!(live.is_empty());

    let ops: Vec<ChangeOp> = log.messages().iter().map(|m| m.op).collect();
    assert_eq!(ops.first(), Some(&ChangeOp::Insert));
    assert_eq!(ops.last(), Some(&ChangeOp::Delete));
}

#[test]
fn scenario_self_join_employees_to_managers() {
    let employees = local_collection("employees");
    let employee = |id: i64, manager: Value| {
        Value::map([("id", Value::Int(id)), ("managerId", manager)])
    };
    employees.insert(employee(1, Value::Null)).unwrap();
    employees.insert(employee(2, Value::Int(1))).unwrap();
    employees.insert(employee(3, Value::Int(1))).unwrap();

    let query = QueryBuilder::from("employees", "e")
        .join(
            "employees",
            "m",
            JoinType::Left,
            col("e.managerId"),
            col("m.id"),
        )
        .build();
    let live = create_live_query_collection(
        LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
        &[employees.clone()],
    )
    .unwrap();
    live.preload().unwrap();

    assert_eq!(live.len(), 3);
    let rows = live.rows_ordered();
    let row_for = |id: i64| {
        rows.iter()
            .find(|row| row.field("e").and_then(|e| e.field("id")) == Some(&Value::Int(id)))
            .cloned()
            .unwrap()
    };
    // the root has no manager: m is null-filled
    assert_eq!(row_for(1).field("m"), Some(&Value::Null));
    for id in [2, 3] {
        assert_eq!(
            row_for(id).field("m").and_then(|m| m.field("id")),
            Some(&Value::Int(1))
        );
    }
}

#[test]
fn scenario_topk_fractional_single_move() {
    let items = local_collection("items");
    let item = |id: i64, order: i64| {
        Value::map([("id", Value::Int(id)), ("order", Value::Int(order))])
    };
    for (id, order) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50), (6, 60)] {
        items.insert(item(id, order)).unwrap();
    }

    let query = QueryBuilder::from("items", "i")
        .order_by(OrderBySpec::asc(col("i.order")))
        .limit(3)
        .build();
    let live = create_live_query_collection(
        LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
        &[items.clone()],
    )
    .unwrap();
    live.preload().unwrap();

    let window = live.rows_ordered();
    let ids: Vec<_> = window
        .iter()
        .map(|row| row.field("id").cloned().unwrap())
        .collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let index_of = |rows: &[Value], id: i64| {
        rows.iter()
            .find(|row| row.field("id") == Some(&Value::Int(id)))
            .and_then(|row| row.field(ORDER_INDEX_FIELD).cloned())
    };
    let f1 = index_of(&window, 1).unwrap();
    let f2 = index_of(&window, 2).unwrap();
    let f3 = index_of(&window, 3).unwrap();
    assert!(f1 < f2 && f2 < f3, "fractional keys ascend with the order");

    let log = BatchLog::attach(&live);

    // move item 2 from order 20 to 55: it leaves the window, item 4 enters
    items
        .update(&key(2), |draft| {
            if let Some(map) = draft.as_map_mut() {
                map.insert("order".to_string(), Value::Int(55));
            }
        })
        .unwrap();

    let window = live.rows_ordered();
    let ids: Vec<_> = window
        .iter()
        .map(|row| row.field("id").cloned().unwrap())
        .collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(3), Value::Int(4)]);

    // untouched rows keep their fractional indexes
    assert_eq!(index_of(&window, 1), Some(f1));
    assert_eq!(index_of(&window, 3), Some(f3));

    // exactly one moveOut and one moveIn crossed the wire
    let messages = log.messages();
    let touched: Vec<_> = messages.iter().map(|m| m.key.clone()).collect();
    assert!(touched.contains(&key(2)), "moveOut for the moved row");
    assert!(touched.contains(&key(4)), "moveIn for the entering row");
    assert!(!touched.contains(&key(1)) && !touched.contains(&key(3)));
}

#[test]
fn scenario_optimistic_overlay_survives_sync_commit() {
    let (driver, handle) = ScriptedDriver::new(vec![]);
    let pending: Watchable<Result<(), String>> = Watchable::new();
    let cell = pending.clone();
    let on_insert: PersistHandler = Arc::new(move |_txn| cell.clone());
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_sync(driver)
            .with_handlers(Some(on_insert), None, None)
            .with_gc(GcConfig::disabled()),
    );
    todos.preload().unwrap();

    // optimistic insert; the persistence handler stays pending
    let txn = todos.insert(Value::map([("id", Value::Int(42))])).unwrap();
    assert!(todos.has(&key(42)));
    assert!(!txn.is_persisted().is_resolved());

    // an unrelated sync commit lands while the mutation is pending
    handle.commit(vec![WriteOp::insert(Value::map([("id", Value::Int(99))]))]);
    assert!(todos.has(&key(42)), "optimistic row survives the commit");
    assert!(todos.has(&key(99)));
    assert_eq!(todos.len(), 2);

    // the handler resolves, then the driver confirms the write
    pending.resolve(Ok(()));
    assert_eq!(txn.is_persisted().peek(), Some(Ok(())));
    handle.commit(vec![WriteOp::insert(Value::map([("id", Value::Int(42))]))]);

    // overlay retired: derived equals synced
    assert_eq!(todos.len(), 2);
    assert!(todos.has(&key(42)) && todos.has(&key(99)));
}

#[test]
fn scenario_union_duplicate_key_conflict() {
    let a = local_collection("a");
    let b = local_collection("b");
    a.insert(Value::map([("id", Value::Int(5)), ("from", Value::from("a"))]))
        .unwrap();
    b.insert(Value::map([("id", Value::Int(5)), ("from", Value::from("b"))]))
        .unwrap();

    let query = QueryBuilder::from("a", "x")
        .union(QueryBuilder::from("b", "y").build())
        .build();
    let live = create_live_query_collection(
        LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
        &[a, b],
    )
    .unwrap();

    assert!(live.preload().is_err());
    assert_eq!(live.status(), CollectionStatus::Error);
    assert!(matches!(
        live.latest_error().as_deref(),
        Some(RilletError::KeyConflict { .. })
    ));
}

#[test]
fn scenario_group_by_min_str_over_nullable_timestamps() {
    let events = local_collection("events");
    let event = |id: i64, group: &str, created_at: Value| {
        Value::map([
            ("id", Value::Int(id)),
            ("group", Value::from(group)),
            ("createdAt", created_at),
        ])
    };
    events
        .insert(event(1, "g1", Value::from("2024-03-01T10:00:00Z")))
        .unwrap();
    events
        .insert(event(2, "g1", Value::from("2024-01-15T08:30:00Z")))
        .unwrap();
    events.insert(event(3, "g1", Value::Null)).unwrap();
    events.insert(event(4, "g2", Value::Null)).unwrap();

    let query = QueryBuilder::from("events", "e")
        .group_by([col("e.group")])
        .select([
            ("group", col("e.group").into()),
            ("earliest", agg::min_str(col("e.createdAt"))),
        ])
        .build();
    let live = create_live_query_collection(
        LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
        &[events.clone()],
    )
    .unwrap();
    live.preload().unwrap();

    assert_eq!(live.len(), 2);
    let earliest_of = |group: &str| {
        live.rows_ordered()
            .into_iter()
            .find(|row| row.field("group") == Some(&Value::from(group)))
            .and_then(|row| row.field("earliest").cloned())
    };
    assert_eq!(
        earliest_of("g1"),
        Some(Value::from("2024-01-15T08:30:00Z")),
        "lexicographically smallest non-null timestamp"
    );
    assert_eq!(earliest_of("g2"), Some(Value::Null), "all-null group");

    // deleting the minimum restores the next-smallest
    events.delete(&key(2)).unwrap();
    assert_eq!(earliest_of("g1"), Some(Value::from("2024-03-01T10:00:00Z")));
}
