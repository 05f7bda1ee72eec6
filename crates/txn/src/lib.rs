//! Optimistic transactions for Rillet
//!
//! Transactions carry an ordered list of mutations against one or more
//! collections. Recording a mutation applies it to the target collection's
//! optimistic overlay immediately; committing hands the batch to a
//! user-supplied mutation function, and the overlay is retired once synced
//! state catches up (or rolled back when persistence fails).
//!
//! The mutate surface on collections finds the current transaction through
//! an ambient scope: `transaction.mutate(|| collection.insert(..))` makes
//! the insert record into that transaction instead of opening an implicit
//! auto-commit one.

pub mod manager;
pub mod mutation;
pub mod transaction;
pub mod watchable;

pub use manager::{create_transaction, TransactionManager, TransactionOptions};
pub use mutation::{Mutation, MutationType};
pub use transaction::{
    ambient_transaction, Isolation, MutationFn, PersistResult, Transaction, TransactionEffects,
    TransactionState,
};
pub use watchable::Watchable;
