//! Consistency laws: derived-state algebra, rollback round trips,
//! lifecycle restarts, declarative-baseline equivalence for live queries,
//! and boundary behaviors.

#[path = "../common/mod.rs"]
mod common;
mod operator_laws;

use common::{key, local_collection, stripped, todo, BatchLog, ScriptedDriver};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rillet::{
    col, create_live_query_collection, eq, lit, Collection, CollectionConfig, CollectionStatus,
    GcConfig, JoinType, LiveQueryConfig, OrderBySpec, PersistHandler, QueryBuilder,
    SubscribeOptions, Value, Watchable, WriteOp, ORDER_INDEX_FIELD,
};
use std::sync::Arc;

#[test]
fn derived_state_is_synced_plus_overlay() {
    common::init_tracing();
    let (driver, handle) = ScriptedDriver::new(vec![vec![
        WriteOp::insert(todo(1, "synced-1", false)),
        WriteOp::insert(todo(2, "synced-2", false)),
    ]]);
    let pending: Watchable<Result<(), String>> = Watchable::new();
    let cell = pending.clone();
    let handler: PersistHandler = Arc::new(move |_txn| cell.clone());
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_sync(driver)
            .with_handlers(Some(handler.clone()), Some(handler.clone()), Some(handler))
            .with_gc(GcConfig::disabled()),
    );
    todos.preload().unwrap();
    assert_eq!(todos.len(), 2);

    // pending optimistic update shadows synced state
    todos
        .update(&key(1), |draft| {
            if let Some(map) = draft.as_map_mut() {
                map.insert("text".to_string(), Value::from("optimistic"));
            }
        })
        .unwrap();
    assert_eq!(
        todos.get(&key(1)).unwrap().field("text"),
        Some(&Value::from("optimistic"))
    );
    // untouched key reads straight from synced
    assert_eq!(
        todos.get(&key(2)).unwrap().field("text"),
        Some(&Value::from("synced-2"))
    );

    // a sync commit to the shadowed key does not pierce the overlay
    handle.commit(vec![WriteOp::update(todo(1, "newer-synced", false), None)]);
    assert_eq!(
        todos.get(&key(1)).unwrap().field("text"),
        Some(&Value::from("optimistic"))
    );
}

#[test]
fn insert_then_delete_restores_pre_insert_state() {
    let todos = local_collection("todos");
    todos.insert(todo(1, "keep", false)).unwrap();
    let before = todos.entries();

    todos.insert(todo(9, "ephemeral", false)).unwrap();
    todos.delete(&key(9)).unwrap();

    assert_eq!(todos.entries(), before);
    assert!(!todos.has(&key(9)));
}

#[test]
fn rolled_back_transaction_restores_state_byte_for_byte() {
    let pending: Watchable<Result<(), String>> = Watchable::new();
    let cell = pending.clone();
    let handler: PersistHandler = Arc::new(move |_txn| cell.clone());
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_handlers(Some(handler.clone()), Some(handler.clone()), Some(handler))
            .with_gc(GcConfig::disabled()),
    );
    // seed through a committed transaction first
    let seed: Watchable<Result<(), String>> = pending.clone();
    todos.insert(todo(1, "a", false)).unwrap();
    todos.insert(todo(2, "b", true)).unwrap();
    seed.resolve(Ok(()));
    let before = todos.entries();

    // a multi-mutation transaction that fails
    let failing: Watchable<Result<(), String>> = Watchable::new();
    let fail_cell = failing.clone();
    let txn = rillet::create_transaction(rillet::TransactionOptions::manual(Box::new(
        move |_| fail_cell.clone(),
    )));
    txn.mutate(|| {
        todos.insert(todo(3, "c", false)).unwrap();
        todos
            .update(&key(1), |draft| {
                if let Some(map) = draft.as_map_mut() {
                    map.insert("text".to_string(), Value::from("changed"));
                }
            })
            .unwrap();
        todos.delete(&key(2)).unwrap();
    })
    .unwrap();
    txn.commit().unwrap();

    // all three mutations visible optimistically
    assert!(todos.has(&key(3)));
    assert!(!todos.has(&key(2)));

    failing.resolve(Err("backend rejected".to_string()));
    assert_eq!(todos.entries(), before);
}

#[test]
fn resubscribe_after_cleanup_yields_same_snapshot() {
    let (driver, handle) = ScriptedDriver::new(vec![vec![
        WriteOp::insert(todo(1, "a", false)),
        WriteOp::insert(todo(2, "b", true)),
    ]]);
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_sync(driver)
            .with_gc(GcConfig::disabled()),
    );

    let first: Arc<parking_lot::Mutex<Vec<rillet::ChangeMessage>>> = Default::default();
    let sink = Arc::clone(&first);
    let sub = todos.subscribe_changes(
        move |batch| sink.lock().extend(batch.to_vec()),
        SubscribeOptions {
            include_initial_state: true,
        },
    );
    let first_snapshot: Vec<Value> = first.lock().iter().map(|m| m.value.clone()).collect();
    assert_eq!(first_snapshot.len(), 2);
    assert_eq!(handle.starts(), 1);

    sub.unsubscribe();
    todos.cleanup().unwrap();
    assert_eq!(todos.status(), CollectionStatus::CleanedUp);
    assert_eq!(handle.cleanups(), 1);
    assert!(todos.is_empty());

    // a new subscription restarts the driver and replays the same content
    let second: Arc<parking_lot::Mutex<Vec<rillet::ChangeMessage>>> = Default::default();
    let sink = Arc::clone(&second);
    let _sub = todos.subscribe_changes(
        move |batch| sink.lock().extend(batch.to_vec()),
        SubscribeOptions {
            include_initial_state: true,
        },
    );
    assert_eq!(handle.starts(), 2);
    let second_snapshot: Vec<Value> = second.lock().iter().map(|m| m.value.clone()).collect();
    assert_eq!(first_snapshot, second_snapshot);
}

#[test]
fn stale_cleanup_does_not_cancel_restarted_driver() {
    let (driver, handle) = ScriptedDriver::new(vec![vec![WriteOp::insert(todo(1, "a", false))]]);
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_sync(driver)
            .with_gc(GcConfig::disabled()),
    );
    todos.preload().unwrap();
    let stale_ctx = handle.context();

    // cleanup begins, then a restart happens
    todos.cleanup().unwrap();
    todos.preload().unwrap();
    assert_eq!(handle.starts(), 2);
    assert_eq!(todos.len(), 1);

    // the stale instance's late writes are ignored entirely
    stale_ctx.begin();
    stale_ctx.write(WriteOp::insert(todo(99, "ghost", false)));
    stale_ctx.commit();
    assert!(!todos.has(&key(99)));

    // while the new instance keeps feeding normally
    handle.commit(vec![WriteOp::insert(todo(2, "b", false))]);
    assert!(todos.has(&key(2)));
}

#[test]
fn live_query_matches_declarative_baseline() {
    let todos = local_collection("todos");
    let live = {
        let query = QueryBuilder::from("todos", "t")
            .where_(eq(col("t.completed"), lit(false)))
            .build();
        let live = create_live_query_collection(
            LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
            &[todos.clone()],
        )
        .unwrap();
        live.preload().unwrap();
        live
    };

    let mut rng = StdRng::seed_from_u64(42);
    for step in 0..200 {
        let id = rng.gen_range(0..20i64);
        match rng.gen_range(0..3) {
            0 => {
                if !todos.has(&key(id)) {
                    todos
                        .insert(todo(id, &format!("t{step}"), rng.gen_bool(0.5)))
                        .unwrap();
                }
            }
            1 => {
                if todos.has(&key(id)) {
                    let completed = rng.gen_bool(0.5);
                    todos
                        .update(&key(id), |draft| {
                            if let Some(map) = draft.as_map_mut() {
                                map.insert("completed".to_string(), Value::Bool(completed));
                            }
                        })
                        .unwrap();
                }
            }
            _ => {
                if todos.has(&key(id)) {
                    todos.delete(&key(id)).unwrap();
                }
            }
        }

        // declarative baseline: filter a snapshot of the source
        let mut expected: Vec<Value> = todos
            .entries()
            .into_iter()
            .map(|(_, value)| value)
            .filter(|row| row.field("completed") == Some(&Value::Bool(false)))
            .collect();
        let mut actual: Vec<Value> = live.rows_ordered().iter().map(stripped).collect();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected, "diverged at step {step}");
    }
}

#[test]
fn boundary_limit_zero_and_offset_beyond_size() {
    let items = local_collection("items");
    for id in 0..4i64 {
        items
            .insert(Value::map([("id", Value::Int(id)), ("order", Value::Int(id))]))
            .unwrap();
    }

    let zero = create_live_query_collection(
        LiveQueryConfig::new(
            QueryBuilder::from("items", "i")
                .order_by(OrderBySpec::asc(col("i.order")))
                .limit(0)
                .build(),
        )
        .with_gc(GcConfig::disabled()),
        &[items.clone()],
    )
    .unwrap();
    zero.preload().unwrap();
    assert!(zero.is_empty());

    let beyond = create_live_query_collection(
        LiveQueryConfig::new(
            QueryBuilder::from("items", "i")
                .order_by(OrderBySpec::asc(col("i.order")))
                .offset(10)
                .limit(3)
                .build(),
        )
        .with_gc(GcConfig::disabled()),
        &[items],
    )
    .unwrap();
    beyond.preload().unwrap();
    assert!(beyond.is_empty());
}

#[test]
fn boundary_joins_over_empty_sides() {
    let left = local_collection("left");
    let right = local_collection("right");

    // both empty
    let inner = create_live_query_collection(
        LiveQueryConfig::new(
            QueryBuilder::from("left", "l")
                .join("right", "r", JoinType::Inner, col("l.rid"), col("r.id"))
                .build(),
        )
        .with_gc(GcConfig::disabled()),
        &[left.clone(), right.clone()],
    )
    .unwrap();
    inner.preload().unwrap();
    assert!(inner.is_empty());

    // preserving side populated, other side empty: null-filled counterparts
    left.insert(Value::map([("id", Value::Int(1)), ("rid", Value::Int(7))]))
        .unwrap();
    let outer = create_live_query_collection(
        LiveQueryConfig::new(
            QueryBuilder::from("left", "l")
                .join("right", "r", JoinType::Left, col("l.rid"), col("r.id"))
                .build(),
        )
        .with_gc(GcConfig::disabled()),
        &[left, right],
    )
    .unwrap();
    outer.preload().unwrap();
    assert_eq!(outer.len(), 1);
    let row = outer.find_one().unwrap();
    assert_eq!(row.field("r"), Some(&Value::Null));
}

#[test]
fn fractional_window_stays_sorted_under_churn() {
    let items = local_collection("items");
    let live = {
        let query = QueryBuilder::from("items", "i")
            .order_by(OrderBySpec::asc(col("i.rank")))
            .limit(5)
            .build();
        let live = create_live_query_collection(
            LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
            &[items.clone()],
        )
        .unwrap();
        live.preload().unwrap();
        live
    };

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..300 {
        let id = rng.gen_range(0..30i64);
        if todo_exists(&items, id) {
            if rng.gen_bool(0.5) {
                let rank = rng.gen_range(0..1000i64);
                items
                    .update(&key(id), |draft| {
                        if let Some(map) = draft.as_map_mut() {
                            map.insert("rank".to_string(), Value::Int(rank));
                        }
                    })
                    .unwrap();
            } else {
                items.delete(&key(id)).unwrap();
            }
        } else {
            let rank = rng.gen_range(0..1000i64);
            items
                .insert(Value::map([("id", Value::Int(id)), ("rank", Value::Int(rank))]))
                .unwrap();
        }

        // the fractional order must agree with the rank order at every step
        let rows = live.rows_ordered();
        assert!(rows.len() <= 5);
        let ranks: Vec<i64> = rows
            .iter()
            .map(|row| row.field("rank").and_then(Value::as_i64).unwrap())
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
        // and the window must hold the smallest ranks present
        let mut all_ranks: Vec<i64> = items
            .entries()
            .iter()
            .map(|(_, row)| row.field("rank").and_then(Value::as_i64).unwrap())
            .collect();
        all_ranks.sort();
        let expected: Vec<i64> = all_ranks.into_iter().take(5).collect();
        assert_eq!(ranks, expected);
        for row in &rows {
            assert!(row.field(ORDER_INDEX_FIELD).is_some());
        }
    }
}

fn todo_exists(collection: &Collection, id: i64) -> bool {
    collection.has(&key(id))
}

#[test]
fn gc_collects_after_idle_window() {
    use std::time::Duration;
    let (driver, handle) = ScriptedDriver::new(vec![vec![WriteOp::insert(todo(1, "a", false))]]);
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_sync(driver)
            .with_gc(GcConfig::default().with_idle_timeout(Duration::from_millis(50))),
    );
    let sub = todos.subscribe_changes(|_| {}, SubscribeOptions::default());
    assert_eq!(todos.status(), CollectionStatus::Ready);

    sub.unsubscribe();
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(todos.status(), CollectionStatus::CleanedUp);
    assert_eq!(handle.cleanups(), 1);
}

#[test]
fn resubscribing_within_idle_window_cancels_gc() {
    use std::time::Duration;
    let (driver, _handle) = ScriptedDriver::new(vec![vec![WriteOp::insert(todo(1, "a", false))]]);
    let todos = Collection::new(
        CollectionConfig::keyed_by_id("todos")
            .with_sync(driver)
            .with_gc(GcConfig::default().with_idle_timeout(Duration::from_millis(100))),
    );
    let sub = todos.subscribe_changes(|_| {}, SubscribeOptions::default());
    sub.unsubscribe();

    // a new subscriber inside the window keeps the collection alive
    let _keeper = todos.subscribe_changes(|_| {}, SubscribeOptions::default());
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(todos.status(), CollectionStatus::Ready);
    assert_eq!(todos.len(), 1);
}

#[test]
fn change_batches_are_never_partial() {
    let todos = local_collection("todos");
    let log = BatchLog::attach(&todos);

    let txn = rillet::create_transaction(rillet::TransactionOptions {
        auto_commit: false,
        ..Default::default()
    });
    txn.mutate(|| {
        todos.insert(todo(1, "a", false)).unwrap();
        todos.insert(todo(2, "b", false)).unwrap();
        todos.insert(todo(3, "c", false)).unwrap();
    })
    .unwrap();
    txn.commit().unwrap();

    // each mutate call lands as one coherent batch per collection write;
    // no observed batch straddles another's messages out of order
    let keys_seen: Vec<i64> = log
        .messages()
        .iter()
        .filter(|m| m.op == rillet::ChangeOp::Insert)
        .map(|m| match &m.key {
            rillet::KeyValue::Int(i) => *i,
            other => panic!("unexpected key {other}"),
        })
        .collect();
    assert_eq!(keys_seen, vec![1, 2, 3]);
}
