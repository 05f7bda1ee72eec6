//! Transaction lifecycle
//!
//! State transitions:
//! - `Pending` → `Persisting` (commit invokes the mutation function)
//! - `Persisting` → `Completed` (handler resolved Ok)
//! - `Persisting` → `Failed` (handler resolved Err; overlays roll back)
//! - `Pending` → `RolledBack` (explicit rollback before commit)
//!
//! Terminal states: `Completed`, `Failed`, `RolledBack`.
//!
//! Collections register a `TransactionEffects` hook when a transaction
//! first touches them; the transaction notifies those hooks on completion
//! and rollback so overlays retire or unwind. Optimistic effects are
//! visible before the mutation function resolves.

use crate::mutation::Mutation;
use crate::watchable::Watchable;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rillet_core::{KeyValue, Result, RilletError, TxId};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a mutation function
pub type PersistResult = std::result::Result<(), String>;

/// The user-supplied persistence entry point. Synchronous handlers return
/// `Watchable::resolved(..)`; asynchronous ones keep the cell and resolve
/// it when the write lands.
pub type MutationFn = Box<dyn Fn(&Transaction) -> Watchable<PersistResult> + Send + Sync>;

/// Hook a collection registers on first touch
pub trait TransactionEffects: Send + Sync {
    /// Persistence succeeded: retire the overlay once synced state covers
    /// the transaction's keys
    fn on_completed(&self, txn: &Transaction);
    /// The transaction failed or was rolled back: unwind the overlay and
    /// re-notify subscribers
    fn on_rolled_back(&self, txn: &Transaction);
}

/// Isolation marker
///
/// `Serialized` marks transactions whose overlapping writes must apply in
/// creation order; the per-key overlay stack already applies entries in
/// record order, so the marker is informational for persistence layers
/// that replay mutations remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// No cross-transaction ordering guarantees beyond per-key stacking
    #[default]
    None,
    /// Overlapping writes apply in creation order
    Serialized,
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Recording mutations
    Pending,
    /// Mutation function invoked, not yet resolved
    Persisting,
    /// Persisted; overlay retires as synced state catches up
    Completed,
    /// Mutation function rejected; overlay rolled back
    Failed,
    /// Explicitly rolled back before commit
    RolledBack,
}

impl TransactionState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Failed | TransactionState::RolledBack
        )
    }

    /// Name for logs
    pub fn name(self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Persisting => "persisting",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
            TransactionState::RolledBack => "rolled-back",
        }
    }
}

struct TransactionInner {
    id: TxId,
    created_at: DateTime<Utc>,
    auto_commit: bool,
    isolation: Isolation,
    state: Mutex<TransactionState>,
    mutations: Mutex<Vec<Mutation>>,
    effects: Mutex<Vec<(String, Arc<dyn TransactionEffects>)>>,
    mutation_fn: Option<MutationFn>,
    persisted: Watchable<PersistResult>,
}

/// An optimistic transaction handle. Cheap to clone; all clones share
/// state.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

thread_local! {
    static AMBIENT: RefCell<Vec<Transaction>> = const { RefCell::new(Vec::new()) };
}

/// The transaction currently in `mutate` scope on this thread, if any
pub fn ambient_transaction() -> Option<Transaction> {
    AMBIENT.with(|stack| stack.borrow().last().cloned())
}

impl Transaction {
    pub(crate) fn new(
        auto_commit: bool,
        isolation: Isolation,
        mutation_fn: Option<MutationFn>,
    ) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner {
                id: TxId::new(),
                created_at: Utc::now(),
                auto_commit,
                isolation,
                state: Mutex::new(TransactionState::Pending),
                mutations: Mutex::new(Vec::new()),
                effects: Mutex::new(Vec::new()),
                mutation_fn,
                persisted: Watchable::new(),
            }),
        }
    }

    /// Transaction id
    pub fn id(&self) -> TxId {
        self.inner.id
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Isolation marker
    pub fn isolation(&self) -> Isolation {
        self.inner.isolation
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    /// Ordered mutations recorded so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.mutations.lock().clone()
    }

    /// Keys this transaction touched in one collection
    pub fn touched_keys(&self, collection_id: &str) -> Vec<KeyValue> {
        let mut keys = Vec::new();
        for mutation in self.inner.mutations.lock().iter() {
            if mutation.collection_id == collection_id && !keys.contains(&mutation.key) {
                keys.push(mutation.key.clone());
            }
        }
        keys
    }

    /// Completion cell: resolves Ok on successful persistence, Err with
    /// the failure message otherwise
    pub fn is_persisted(&self) -> Watchable<PersistResult> {
        self.inner.persisted.clone()
    }

    /// Run `f` with this transaction as the ambient mutate target.
    /// Collection write operations inside record into this transaction.
    /// Auto-commit transactions commit when the scope closes.
    pub fn mutate<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if self.state().is_terminal() {
            return Err(RilletError::invalid_state(format!(
                "cannot mutate a {} transaction",
                self.state().name()
            )));
        }
        AMBIENT.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = f();
        AMBIENT.with(|stack| {
            stack.borrow_mut().pop();
        });
        if self.inner.auto_commit && self.state() == TransactionState::Pending {
            self.commit()?;
        }
        Ok(result)
    }

    /// Record a mutation and register the target collection's effects
    /// hook. Called by the collection write path, which has already
    /// applied the optimistic overlay.
    pub fn record(&self, mutation: Mutation, effects: Arc<dyn TransactionEffects>) -> Result<()> {
        if self.state() != TransactionState::Pending {
            return Err(RilletError::invalid_state(format!(
                "cannot record into a {} transaction",
                self.state().name()
            )));
        }
        let mut hooks = self.inner.effects.lock();
        if !hooks
            .iter()
            .any(|(collection, _)| *collection == mutation.collection_id)
        {
            hooks.push((mutation.collection_id.clone(), effects));
        }
        drop(hooks);
        self.inner.mutations.lock().push(mutation);
        Ok(())
    }

    /// Invoke the mutation function. Optimistic effects are already
    /// visible; this only drives persistence. Returns immediately; the
    /// outcome arrives through `is_persisted`.
    pub fn commit(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != TransactionState::Pending {
                return Err(RilletError::invalid_state(format!(
                    "cannot commit a {} transaction",
                    state.name()
                )));
            }
            *state = TransactionState::Persisting;
        }
        debug!(txid = %self.id(), mutations = self.inner.mutations.lock().len(), "transaction persisting");

        match &self.inner.mutation_fn {
            None => {
                // nothing to persist through: durable by definition
                self.complete();
            }
            Some(mutation_fn) => {
                let outcome = mutation_fn(self);
                let this = self.clone();
                outcome.on_resolve(move |result| match result {
                    Ok(()) => this.complete(),
                    Err(message) => this.fail(message.clone()),
                });
            }
        }
        Ok(())
    }

    /// Treat the mutations as already durable without invoking the
    /// mutation function (persistence-adapter escape hatch).
    pub fn accept_mutations(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return Err(RilletError::invalid_state(format!(
                    "cannot accept a {} transaction",
                    state.name()
                )));
            }
            *state = TransactionState::Persisting;
        }
        self.complete();
        Ok(())
    }

    /// Roll back before commit: unwind overlays, resolve `is_persisted`
    /// with the failure.
    pub fn rollback(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return Err(RilletError::invalid_state(format!(
                    "cannot roll back a {} transaction",
                    state.name()
                )));
            }
            *state = TransactionState::RolledBack;
        }
        debug!(txid = %self.id(), reason = %reason, "transaction rolled back");
        self.notify_rolled_back();
        self.inner.persisted.resolve(Err(reason));
        Ok(())
    }

    fn complete(&self) {
        *self.inner.state.lock() = TransactionState::Completed;
        debug!(txid = %self.id(), "transaction completed");
        for (_, effects) in self.inner.effects.lock().iter() {
            effects.on_completed(self);
        }
        self.inner.persisted.resolve(Ok(()));
    }

    fn fail(&self, message: String) {
        *self.inner.state.lock() = TransactionState::Failed;
        debug!(txid = %self.id(), error = %message, "transaction failed");
        self.notify_rolled_back();
        self.inner.persisted.resolve(Err(message));
    }

    fn notify_rolled_back(&self) {
        for (_, effects) in self.inner.effects.lock().iter() {
            effects.on_rolled_back(self);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("mutations", &self.inner.mutations.lock().len())
            .finish()
    }
}
