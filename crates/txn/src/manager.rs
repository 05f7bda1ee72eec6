//! Transaction manager
//!
//! A registry of live transactions keyed by id. Terminal transactions are
//! swept out of the registry when their persistence outcome resolves, so
//! the map only holds work in flight. `create_transaction` at module scope
//! goes through a process-wide manager, mirroring the mutate surface.

use crate::transaction::{Isolation, MutationFn, Transaction};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rillet_core::TxId;
use std::sync::Arc;

/// Options for `create_transaction`
pub struct TransactionOptions {
    /// Commit when the `mutate` scope closes
    pub auto_commit: bool,
    /// Isolation marker carried on the transaction
    pub isolation: Isolation,
    /// Persistence entry point; `None` treats commits as durable
    pub mutation_fn: Option<MutationFn>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            auto_commit: true,
            isolation: Isolation::default(),
            mutation_fn: None,
        }
    }
}

impl TransactionOptions {
    /// Manual-commit options with a mutation function
    pub fn manual(mutation_fn: MutationFn) -> Self {
        TransactionOptions {
            auto_commit: false,
            isolation: Isolation::default(),
            mutation_fn: Some(mutation_fn),
        }
    }

    /// Auto-commit options with a mutation function
    pub fn auto(mutation_fn: MutationFn) -> Self {
        TransactionOptions {
            auto_commit: true,
            isolation: Isolation::default(),
            mutation_fn: Some(mutation_fn),
        }
    }
}

/// Registry of in-flight transactions
#[derive(Default)]
pub struct TransactionManager {
    live: Arc<DashMap<TxId, Transaction>>,
}

impl TransactionManager {
    /// Fresh manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a transaction
    pub fn create(&self, options: TransactionOptions) -> Transaction {
        let txn = Transaction::new(options.auto_commit, options.isolation, options.mutation_fn);
        self.live.insert(txn.id(), txn.clone());

        // sweep on resolution, whichever way it went
        let live = Arc::clone(&self.live);
        let id = txn.id();
        txn.is_persisted().on_resolve(move |_| {
            live.remove(&id);
        });
        txn
    }

    /// Look up a live transaction
    pub fn get(&self, id: TxId) -> Option<Transaction> {
        self.live.get(&id).map(|entry| entry.clone())
    }

    /// Number of transactions still in flight
    pub fn in_flight(&self) -> usize {
        self.live.len()
    }
}

static GLOBAL: Lazy<TransactionManager> = Lazy::new(TransactionManager::new);

/// Create a transaction on the process-wide manager
pub fn create_transaction(options: TransactionOptions) -> Transaction {
    GLOBAL.create(options)
}
