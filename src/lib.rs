//! # Rillet
//!
//! A reactive client-side data layer: keyed collections with optimistic
//! mutations, kept consistent with authoritative synced state, and
//! arbitrarily composed relational queries maintained incrementally by a
//! differential dataflow engine. Work done per change is proportional to
//! the change, not to collection size.
//!
//! # Quick Start
//!
//! ```no_run
//! use rillet::{
//!     col, create_live_query_collection, eq, lit, Collection, CollectionConfig,
//!     LiveQueryConfig, QueryBuilder, SubscribeOptions,
//! };
//!
//! fn main() -> rillet::Result<()> {
//!     // a keyed collection (local-only: no sync driver)
//!     let todos = Collection::new(CollectionConfig::keyed_by_id("todos"));
//!     todos.insert(rillet::Value::map([
//!         ("id", 1i64.into()),
//!         ("text", "write docs".into()),
//!         ("completed", false.into()),
//!     ]))?;
//!
//!     // a live query over it
//!     let pending = create_live_query_collection(
//!         LiveQueryConfig::new(
//!             QueryBuilder::from("todos", "t")
//!                 .where_(eq(col("t.completed"), lit(false)))
//!                 .build(),
//!         ),
//!         &[todos.clone()],
//!     )?;
//!     pending.preload()?;
//!
//!     // incremental updates flow through automatically
//!     let _sub = pending.subscribe_changes(|batch| println!("{batch:?}"), SubscribeOptions::default());
//!     todos.update(&1i64.into(), |draft| {
//!         if let Some(map) = draft.as_map_mut() {
//!             map.insert("completed".to_string(), true.into());
//!         }
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | crate | concern |
//! |-------|---------|
//! | `rillet-core` | values, keys, change messages, errors, config |
//! | `rillet-dataflow` | multisets, difference streams, operators, scheduler |
//! | `rillet-query` | query IR, builder, compiler, three-valued logic |
//! | `rillet-txn` | optimistic transactions and persistence dispatch |
//! | `rillet-index` | equality/ordered indexes and the dev advisor |
//! | `rillet-collections` | collection core, sync protocol, live queries |

// Core types
pub use rillet_core::{
    ChangeMessage, ChangeMeta, ChangeOp, GcConfig, KeyFn, KeyValue, Observer, ObserverEvent,
    Origin, Result, RilletError, SchedulerLimits, SchemaValidator, TxId, ValidationIssue,
    ValidationOutcome, Value, Virtuals, WriteOp,
};

// Collections and live queries
pub use rillet_collections::{
    create_live_query_collection, CleanupHandle, Collection, CollectionConfig, CollectionStatus,
    LiveQueryConfig, PersistHandler, SubscribeOptions, Subscription, SyncContext, SyncDriver,
};

// Query building
pub use rillet_query::builder::{
    agg, and_, col, eq, gt, gte, in_list, lit, lt, lte, neq, not_, null, or_,
};
pub use rillet_query::{
    AggregateExpr, AggregateFunc, Expr, FunctionRegistry, JoinType, OrderBySpec, Query,
    QueryBuilder, Ref, SelectItem, ORDER_INDEX_FIELD,
};

// Transactions
pub use rillet_txn::{
    create_transaction, Isolation, Mutation, MutationType, Transaction, TransactionOptions,
    TransactionState, Watchable,
};

// Indexing
pub use rillet_index::{Advisor, Index, IndexCatalog, IndexType, ScanPlan};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_exposes_the_surfaces() {
        // collection + mutation surface
        let todos = Collection::new(
            CollectionConfig::keyed_by_id("todos").with_gc(GcConfig::disabled()),
        );
        let txn = todos
            .insert(Value::map([("id", Value::Int(1))]))
            .expect("insert");
        assert_eq!(txn.state(), TransactionState::Completed);

        // query surface
        let query = QueryBuilder::from("todos", "t")
            .where_(eq(col("t.id"), lit(1i64)))
            .build();
        let live = create_live_query_collection(
            LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
            &[todos],
        )
        .expect("live query");
        live.preload().expect("preload");
        assert_eq!(live.len(), 1);
    }
}
