//! Collection core
//!
//! Maintains the three-tier state and broadcasts coherent change batches.
//! Writes go through optimistic transactions: the overlay entry and the
//! derived update are visible to readers and subscribers before the
//! persistence handler resolves. Synced state arrives through the sync
//! driver protocol in atomic batches.
//!
//! Overlay retirement: a completed transaction's entries are marked as
//! awaiting sync and drop when a sync write confirms their key. A
//! collection without a sync driver writes through to synced state on
//! completion instead.

use crate::state::{CollectionState, OverlayEntry};
use crate::status::CollectionStatus;
use crate::subscribers::{SubscribeOptions, SubscriberRegistry, Subscription};
use crate::sync::{CleanupHandle, SyncContext, SyncDriver, SyncTarget};
use parking_lot::{Mutex, RwLock};
use rillet_core::{
    ChangeMessage, ChangeMeta, ChangeOp, GcConfig, KeyFn, KeyValue, Observer, ObserverEvent,
    Result, RilletError, SchemaValidator, TxId, Value, WriteOp,
};
use rillet_index::{Advisor, Index, IndexCatalog, IndexType};
use rillet_query::functions::FunctionRegistry;
use rillet_query::Expr;
use rillet_txn::{
    ambient_transaction, create_transaction, Mutation, MutationType, PersistResult, Transaction,
    TransactionEffects, TransactionOptions, Watchable,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// User-supplied persistence handler for one mutation type
pub type PersistHandler = Arc<dyn Fn(&Transaction) -> Watchable<PersistResult> + Send + Sync>;

/// Collection configuration
pub struct CollectionConfig {
    /// Collection id, unique among collaborating collections
    pub id: String,
    /// Key function
    pub get_key: KeyFn,
    /// Schema validator applied before overlay application
    pub schema: Option<Arc<dyn SchemaValidator>>,
    /// Sync driver; `None` makes the collection local-only
    pub sync: Option<Arc<dyn SyncDriver>>,
    /// Persistence handler for inserts
    pub on_insert: Option<PersistHandler>,
    /// Persistence handler for updates
    pub on_update: Option<PersistHandler>,
    /// Persistence handler for deletes
    pub on_delete: Option<PersistHandler>,
    /// GC policy
    pub gc: GcConfig,
    /// Start the sync driver at construction instead of lazily
    pub start_sync: bool,
    /// Scalar function registry for index expressions
    pub functions: Arc<FunctionRegistry>,
    /// Shared index advisor, when enabled
    pub advisor: Option<Arc<Advisor>>,
}

impl CollectionConfig {
    /// Config with defaults: no schema, no driver, no handlers, default GC
    pub fn new(id: impl Into<String>, get_key: KeyFn) -> Self {
        CollectionConfig {
            id: id.into(),
            get_key,
            schema: None,
            sync: None,
            on_insert: None,
            on_update: None,
            on_delete: None,
            gc: GcConfig::default(),
            start_sync: false,
            functions: Arc::new(FunctionRegistry::new()),
            advisor: None,
        }
    }

    /// Key records by an integer or string `id` field
    pub fn keyed_by_id(id: impl Into<String>) -> Self {
        Self::new(
            id,
            Arc::new(|value: &Value| {
                value
                    .field("id")
                    .and_then(KeyValue::from_value)
                    .unwrap_or_else(|| KeyValue::from("missing-id"))
            }),
        )
    }

    /// Attach a schema validator
    pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attach a sync driver
    pub fn with_sync(mut self, sync: Arc<dyn SyncDriver>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Attach persistence handlers
    pub fn with_handlers(
        mut self,
        on_insert: Option<PersistHandler>,
        on_update: Option<PersistHandler>,
        on_delete: Option<PersistHandler>,
    ) -> Self {
        self.on_insert = on_insert;
        self.on_update = on_update;
        self.on_delete = on_delete;
        self
    }

    /// Override GC policy
    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    /// Start sync eagerly at construction
    pub fn start_sync_immediate(mut self) -> Self {
        self.start_sync = true;
        self
    }

    /// Attach a shared advisor
    pub fn with_advisor(mut self, advisor: Arc<Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }
}

struct SyncRuntime {
    instance: u64,
    cleanup: Option<CleanupHandle>,
    batch: Option<Vec<WriteOp>>,
    ready: Watchable<std::result::Result<(), String>>,
}

pub(crate) struct CollectionInner {
    config: CollectionConfig,
    state: RwLock<CollectionState>,
    status: Mutex<CollectionStatus>,
    latest_error: Mutex<Option<Arc<RilletError>>>,
    subscribers: SubscriberRegistry,
    sync: Mutex<SyncRuntime>,
    catalog: IndexCatalog,
    observers: Mutex<Vec<Arc<dyn Observer>>>,
    gc_generation: AtomicU64,
    index_subscriptions: Mutex<Vec<Subscription>>,
}

/// A keyed reactive store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Create a collection. With `start_sync` set, the driver starts
    /// immediately; otherwise it starts on the first subscription or
    /// `preload()`.
    pub fn new(config: CollectionConfig) -> Self {
        let catalog = IndexCatalog::new(config.id.clone());
        let start_sync = config.start_sync;
        let collection = Collection {
            inner: Arc::new(CollectionInner {
                config,
                state: RwLock::new(CollectionState::default()),
                status: Mutex::new(CollectionStatus::Idle),
                latest_error: Mutex::new(None),
                subscribers: SubscriberRegistry::new(),
                sync: Mutex::new(SyncRuntime {
                    instance: 0,
                    cleanup: None,
                    batch: None,
                    ready: Watchable::new(),
                }),
                catalog,
                observers: Mutex::new(Vec::new()),
                gc_generation: AtomicU64::new(0),
                index_subscriptions: Mutex::new(Vec::new()),
            }),
        };
        if start_sync {
            if let Err(e) = collection.start_sync_immediate() {
                warn!(collection = %collection.id(), error = %e, "eager sync start failed");
            }
        }
        collection
    }

    /// Collection id
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// Current status
    pub fn status(&self) -> CollectionStatus {
        *self.inner.status.lock()
    }

    /// Most recent fatal error, if any
    pub fn latest_error(&self) -> Option<Arc<RilletError>> {
        self.inner.latest_error.lock().clone()
    }

    /// The scalar function registry used for indexes and live queries
    pub fn functions(&self) -> Arc<FunctionRegistry> {
        Arc::clone(&self.inner.config.functions)
    }

    /// The index catalog
    pub fn catalog(&self) -> &IndexCatalog {
        &self.inner.catalog
    }

    /// The shared advisor, when configured
    pub fn advisor(&self) -> Option<Arc<Advisor>> {
        self.inner.config.advisor.clone()
    }

    /// Register a devtools observer
    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.inner.observers.lock().push(observer);
    }

    // ========== Reads ==========

    /// Derived value for a key
    pub fn get(&self, key: &KeyValue) -> Option<Value> {
        self.inner.state.read().derived.get(key).cloned()
    }

    /// Whether the derived state holds the key
    pub fn has(&self, key: &KeyValue) -> bool {
        self.inner.state.read().derived.contains(key)
    }

    /// Number of derived entries
    pub fn len(&self) -> usize {
        self.inner.state.read().derived.len()
    }

    /// True when the derived state is empty
    pub fn is_empty(&self) -> bool {
        self.inner.state.read().derived.is_empty()
    }

    /// Derived entries in insertion order
    pub fn entries(&self) -> Vec<(KeyValue, Value)> {
        self.inner.state.read().derived.entries()
    }

    /// Derived rows. Rows carrying a fractional `$orderIndex` (live query
    /// results of ordered queries) come back sorted by it; otherwise
    /// insertion order.
    pub fn rows_ordered(&self) -> Vec<Value> {
        let entries = self.inner.state.read().derived.entries();
        let mut rows: Vec<Value> = entries.into_iter().map(|(_, value)| value).collect();
        if rows
            .iter()
            .any(|row| row.field(rillet_query::ORDER_INDEX_FIELD).is_some())
        {
            rows.sort_by(|a, b| {
                let ka = a.field(rillet_query::ORDER_INDEX_FIELD);
                let kb = b.field(rillet_query::ORDER_INDEX_FIELD);
                ka.cmp(&kb)
            });
        }
        rows
    }

    /// First row under `rows_ordered`, the `findOne` convenience shape
    pub fn find_one(&self) -> Option<Value> {
        self.rows_ordered().into_iter().next()
    }

    // ========== Writes ==========

    /// Optimistically insert a record. Duplicate keys are rejected
    /// against derived state.
    pub fn insert(&self, value: Value) -> Result<Transaction> {
        self.insert_many(vec![value])
    }

    /// Optimistically insert several records in one transaction scope
    pub fn insert_many(&self, values: Vec<Value>) -> Result<Transaction> {
        let mut mutations = Vec::with_capacity(values.len());
        for value in values {
            self.validate(&value)?;
            let key = (self.inner.config.get_key)(&value);
            if self.has(&key) {
                return Err(RilletError::invalid_input(format!(
                    "key {key} already exists in '{}'",
                    self.id()
                )));
            }
            mutations.push((key, value));
        }
        self.write_mutations(mutations.into_iter().map(|(key, value)| {
            MutationSpec {
                mutation_type: MutationType::Insert,
                key,
                modified: value,
                original: None,
                changes: None,
            }
        }))
    }

    /// Optimistically update a record through a draft mutator
    pub fn update(
        &self,
        key: &KeyValue,
        mutator: impl FnOnce(&mut Value),
    ) -> Result<Transaction> {
        let current = self.get(key).ok_or_else(|| {
            RilletError::invalid_input(format!("key {key} not found in '{}'", self.id()))
        })?;
        let mut draft = current.clone();
        mutator(&mut draft);
        self.validate(&draft)?;
        let new_key = (self.inner.config.get_key)(&draft);
        if new_key != *key {
            return Err(RilletError::invalid_input(format!(
                "update may not change the key ({key} -> {new_key})"
            )));
        }
        let changes = shallow_diff(&current, &draft);
        self.write_mutations(std::iter::once(MutationSpec {
            mutation_type: MutationType::Update,
            key: key.clone(),
            modified: draft,
            original: Some(current),
            changes,
        }))
    }

    /// Optimistically delete a record
    pub fn delete(&self, key: &KeyValue) -> Result<Transaction> {
        let current = self.get(key).ok_or_else(|| {
            RilletError::invalid_input(format!("key {key} not found in '{}'", self.id()))
        })?;
        self.write_mutations(std::iter::once(MutationSpec {
            mutation_type: MutationType::Delete,
            key: key.clone(),
            modified: current.clone(),
            original: Some(current),
            changes: None,
        }))
    }

    fn validate(&self, value: &Value) -> Result<()> {
        if let Some(schema) = &self.inner.config.schema {
            let outcome = schema.validate(value);
            if !outcome.is_success() {
                return Err(RilletError::validation(self.id(), outcome.issue_strings()));
            }
        }
        Ok(())
    }

    /// Record mutations into the ambient transaction, or an implicit one
    /// that commits immediately. Overlay application and the change batch
    /// happen before commit, so optimistic effects are visible while the
    /// persistence handler is pending.
    fn write_mutations(
        &self,
        specs: impl Iterator<Item = MutationSpec>,
    ) -> Result<Transaction> {
        let (txn, implicit) = match ambient_transaction() {
            Some(txn) => (txn, false),
            None => {
                let options = match self.mutation_dispatch() {
                    Some(mutation_fn) => TransactionOptions::manual(mutation_fn),
                    None => TransactionOptions {
                        auto_commit: false,
                        ..Default::default()
                    },
                };
                (create_transaction(options), true)
            }
        };

        let effects: Arc<dyn TransactionEffects> = Arc::new(CollectionEffects {
            inner: Arc::clone(&self.inner),
        });

        let mut batch = Vec::new();
        for spec in specs {
            let mutation = Mutation {
                collection_id: self.id().to_string(),
                mutation_type: spec.mutation_type,
                key: spec.key.clone(),
                modified: spec.modified.clone(),
                original: spec.original.clone(),
                changes: spec.changes.clone(),
                txid: txn.id(),
            };
            txn.record(mutation, Arc::clone(&effects))?;

            let message = {
                let mut state = self.inner.state.write();
                let previous = state.derived.get(&spec.key).cloned();
                state.push_overlay(
                    spec.key.clone(),
                    OverlayEntry {
                        txid: txn.id(),
                        mutation_type: spec.mutation_type,
                        value: match spec.mutation_type {
                            MutationType::Delete => None,
                            _ => Some(spec.modified.clone()),
                        },
                        awaiting_sync: false,
                    },
                );
                state.recompute_derived(&spec.key);
                let meta = ChangeMeta::local(txn.id());
                match spec.mutation_type {
                    MutationType::Insert => {
                        ChangeMessage::insert(spec.key.clone(), spec.modified.clone(), meta)
                    }
                    MutationType::Update => ChangeMessage::update(
                        spec.key.clone(),
                        spec.modified.clone(),
                        previous.unwrap_or(Value::Null),
                        meta,
                    ),
                    MutationType::Delete => {
                        ChangeMessage::delete(spec.key.clone(), spec.modified.clone(), meta)
                    }
                }
            };
            batch.push(message);
        }

        self.inner.subscribers.notify(&batch);

        if implicit {
            txn.commit()?;
        }
        Ok(txn)
    }

    /// Build the mutation function dispatching to the configured
    /// persistence handlers, when any are present
    fn mutation_dispatch(&self) -> Option<rillet_txn::MutationFn> {
        let config = &self.inner.config;
        if config.on_insert.is_none() && config.on_update.is_none() && config.on_delete.is_none() {
            return None;
        }
        let collection_id = config.id.clone();
        let on_insert = config.on_insert.clone();
        let on_update = config.on_update.clone();
        let on_delete = config.on_delete.clone();
        Some(Box::new(move |txn: &Transaction| {
            let mutations = txn.mutations();
            let has = |mutation_type: MutationType| {
                mutations
                    .iter()
                    .any(|m| m.collection_id == collection_id && m.mutation_type == mutation_type)
            };
            let mut pending = Vec::new();
            if has(MutationType::Insert) {
                if let Some(handler) = &on_insert {
                    pending.push(handler(txn));
                }
            }
            if has(MutationType::Update) {
                if let Some(handler) = &on_update {
                    pending.push(handler(txn));
                }
            }
            if has(MutationType::Delete) {
                if let Some(handler) = &on_delete {
                    pending.push(handler(txn));
                }
            }
            join_persist(pending)
        }))
    }

    // ========== Subscriptions ==========

    /// Subscribe to change batches. Starting a driver lazily: a
    /// subscription against an idle or cleaned-up collection restarts
    /// sync.
    pub fn subscribe_changes(
        &self,
        callback: impl Fn(&[ChangeMessage]) + Send + Sync + 'static,
        options: SubscribeOptions,
    ) -> Subscription {
        let callback: Arc<dyn Fn(&[ChangeMessage]) + Send + Sync> = Arc::new(callback);

        if matches!(
            self.status(),
            CollectionStatus::Idle | CollectionStatus::CleanedUp
        ) {
            if let Err(e) = self.start_sync_immediate() {
                warn!(collection = %self.id(), error = %e, "lazy sync start failed");
            }
        }

        // a live subscriber cancels any pending GC
        self.inner.gc_generation.fetch_add(1, Ordering::SeqCst);

        let subscription = self.inner.subscribers.subscribe(Arc::clone(&callback));
        let inner = Arc::clone(&self.inner);
        subscription.set_on_unsubscribe(move || inner.maybe_schedule_gc());

        if options.include_initial_state {
            let batch = self.initial_state_batch();
            if !batch.is_empty() {
                callback(&batch);
            }
        }
        subscription
    }

    /// Current derived state as an insert batch, with per-key authority
    /// metadata
    pub(crate) fn initial_state_batch(&self) -> Vec<ChangeMessage> {
        let state = self.inner.state.read();
        state
            .derived
            .entries()
            .into_iter()
            .map(|(key, value)| {
                let meta = if state.is_synced_authority(&key) {
                    ChangeMeta::remote()
                } else {
                    let txid = state
                        .overlay
                        .get(&key)
                        .and_then(|stack| stack.last())
                        .map(|entry| entry.txid)
                        .unwrap_or_else(TxId::new);
                    ChangeMeta::local(txid)
                };
                ChangeMessage::insert(key, value, meta)
            })
            .collect()
    }

    // ========== Indexes ==========

    /// Create an index over an expression, seeded from derived state and
    /// maintained through the change-subscription channel
    pub fn create_index(&self, key_expr: Expr, index_type: IndexType) -> Result<Index> {
        let index =
            self.inner
                .catalog
                .create_index(key_expr, index_type, &self.inner.config.functions)?;
        index.apply_changes(&self.initial_state_batch())?;

        let maintenance = index.clone();
        let collection_id = self.id().to_string();
        let subscription = self.inner.subscribers.subscribe(Arc::new(move |batch| {
            if let Err(e) = maintenance.apply_changes(batch) {
                warn!(collection = %collection_id, error = %e, "index maintenance failed");
            }
        }));
        self.inner.index_subscriptions.lock().push(subscription);
        Ok(index)
    }

    // ========== Lifecycle ==========

    /// Start the sync driver now (idempotent)
    pub fn start_sync_immediate(&self) -> Result<()> {
        let (instance, driver) = {
            let mut runtime = self.inner.sync.lock();
            let status = self.status();
            if !matches!(status, CollectionStatus::Idle | CollectionStatus::CleanedUp) {
                return Ok(());
            }
            runtime.instance += 1;
            runtime.batch = None;
            runtime.ready = Watchable::new();
            (runtime.instance, self.inner.config.sync.clone())
        };
        self.inner.transition(CollectionStatus::Loading);

        match driver {
            None => {
                // local-only collections are immediately ready
                self.inner.transition(CollectionStatus::Ready);
                self.inner.sync.lock().ready.resolve(Ok(()));
                Ok(())
            }
            Some(driver) => {
                let ctx = SyncContext::new(
                    Arc::clone(&self.inner) as Arc<dyn SyncTarget>,
                    instance,
                );
                match driver.start(ctx) {
                    Ok(cleanup) => {
                        let mut runtime = self.inner.sync.lock();
                        if runtime.instance == instance {
                            runtime.cleanup = Some(cleanup);
                        } else {
                            // a restart raced us: the cleanup belongs to a
                            // superseded instance, run it now
                            drop(runtime);
                            cleanup();
                        }
                        Ok(())
                    }
                    Err(e) => {
                        let error = RilletError::sync_driver(self.id(), e.to_string());
                        self.inner.fail_with(error);
                        Err(RilletError::sync_driver(self.id(), e.to_string()))
                    }
                }
            }
        }
    }

    /// Start sync and wait until the driver marks ready (or fails)
    pub fn preload(&self) -> Result<()> {
        match self.status() {
            CollectionStatus::Ready => return Ok(()),
            CollectionStatus::Error => {
                return Err(RilletError::sync_driver(
                    self.id(),
                    self.latest_error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "collection is in error state".to_string()),
                ))
            }
            _ => {}
        }
        self.start_sync_immediate()?;
        let ready = self.inner.sync.lock().ready.clone();
        ready
            .wait()
            .map_err(|message| RilletError::sync_driver(self.id(), message))
    }

    /// Stop the driver, unregister subscribers, and drop state. A later
    /// subscription restarts the collection from scratch.
    pub fn cleanup(&self) -> Result<()> {
        let cleanup_handle = {
            let mut runtime = self.inner.sync.lock();
            // bump the instance first: contexts held by the old driver
            // become stale immediately, so its async teardown cannot
            // interfere with a subsequent restart
            runtime.instance += 1;
            runtime.batch = None;
            runtime.cleanup.take()
        };

        self.inner.transition(CollectionStatus::CleanedUp);
        self.inner.subscribers.clear();
        self.inner.index_subscriptions.lock().clear();
        {
            let mut state = self.inner.state.write();
            state.synced.clear();
            state.derived.clear();
            state.overlay.clear();
        }
        if let Some(cleanup) = cleanup_handle {
            cleanup();
        }
        debug!(collection = %self.id(), "cleaned up");
        Ok(())
    }
}

struct MutationSpec {
    mutation_type: MutationType,
    key: KeyValue,
    modified: Value,
    original: Option<Value>,
    changes: Option<Value>,
}

/// Shallow field diff between two map values, `None` when either is not a
/// map
fn shallow_diff(before: &Value, after: &Value) -> Option<Value> {
    let (before, after) = (before.as_map()?, after.as_map()?);
    let mut diff = BTreeMap::new();
    for (field, value) in after {
        if before.get(field) != Some(value) {
            diff.insert(field.clone(), value.clone());
        }
    }
    for field in before.keys() {
        if !after.contains_key(field) {
            diff.insert(field.clone(), Value::Null);
        }
    }
    Some(Value::Map(diff))
}

/// Resolve Ok when every handler resolves Ok; the first Err wins
fn join_persist(cells: Vec<Watchable<PersistResult>>) -> Watchable<PersistResult> {
    if cells.is_empty() {
        return Watchable::resolved(Ok(()));
    }
    let joined: Watchable<PersistResult> = Watchable::new();
    let remaining = Arc::new(AtomicU64::new(cells.len() as u64));
    for cell in cells {
        let joined = joined.clone();
        let remaining = Arc::clone(&remaining);
        cell.on_resolve(move |result| match result {
            Ok(()) => {
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    joined.resolve(Ok(()));
                }
            }
            Err(message) => joined.resolve(Err(message.clone())),
        });
    }
    joined
}

impl CollectionInner {
    fn transition(&self, next: CollectionStatus) -> bool {
        let mut status = self.status.lock();
        if !status.can_transition_to(next) {
            return false;
        }
        debug!(collection = %self.config.id, from = status.name(), to = next.name(), "status change");
        *status = next;
        drop(status);
        let event = ObserverEvent::StatusChanged {
            collection_id: self.config.id.clone(),
            status: next.name(),
        };
        for observer in self.observers.lock().iter() {
            observer.notify(&event);
        }
        true
    }

    fn fail_with(&self, error: RilletError) {
        warn!(collection = %self.config.id, error = %error, "collection failed");
        *self.latest_error.lock() = Some(Arc::new(error));
        self.transition(CollectionStatus::Error);
        self.sync
            .lock()
            .ready
            .resolve(Err(self
                .latest_error
                .lock()
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default()));
    }

    fn maybe_schedule_gc(self: &Arc<Self>) {
        if self.config.gc.disabled || !self.subscribers.is_empty() {
            return;
        }
        let generation = self.gc_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let idle_timeout = self.config.gc.idle_timeout;
        std::thread::spawn(move || {
            std::thread::sleep(idle_timeout);
            if let Some(inner) = weak.upgrade() {
                if inner.gc_generation.load(Ordering::SeqCst) == generation
                    && inner.subscribers.is_empty()
                {
                    debug!(collection = %inner.config.id, "idle window elapsed, collecting");
                    let collection = Collection { inner };
                    let _ = collection.cleanup();
                }
            }
        });
    }

    /// Apply one committed sync batch: update synced state, retire
    /// confirmed overlay entries, recompute derived, and emit exactly the
    /// visible differences.
    fn apply_sync_batch(&self, writes: Vec<WriteOp>) {
        let mut batch = Vec::new();
        {
            let mut state = self.state.write();
            for op in writes {
                let key = (self.config.get_key)(&op.value);
                let old_derived = state.derived.get(&key).cloned();
                let was_synced_authority = state.is_synced_authority(&key);

                match op.op {
                    ChangeOp::Insert | ChangeOp::Update => {
                        state.synced.insert(key.clone(), op.value.clone());
                    }
                    ChangeOp::Delete => {
                        state.synced.remove(&key);
                    }
                }
                // a confirmed write covering this key retires completed
                // overlay entries waiting on it
                state.retire_confirmed(&key);
                let new_derived = state.recompute_derived(&key);
                let now_synced_authority = state.is_synced_authority(&key);

                match (old_derived, new_derived) {
                    (None, Some(value)) => {
                        batch.push(ChangeMessage::insert(key, value, ChangeMeta::remote()));
                    }
                    (Some(previous), Some(value)) => {
                        if previous != value {
                            batch.push(ChangeMessage::update(
                                key,
                                value,
                                previous,
                                ChangeMeta::remote(),
                            ));
                        } else if !was_synced_authority && now_synced_authority {
                            // same bytes, new authority: subscribers learn
                            // the row is now confirmed
                            batch.push(ChangeMessage::update(
                                key,
                                value,
                                previous,
                                ChangeMeta::remote(),
                            ));
                        }
                    }
                    (Some(previous), None) => {
                        batch.push(ChangeMessage::delete(key, previous, ChangeMeta::remote()));
                    }
                    (None, None) => {}
                }
            }
        }
        self.transition(CollectionStatus::InitialCommit);
        self.subscribers.notify(&batch);
    }
}

impl SyncTarget for CollectionInner {
    fn sync_collection_id(&self) -> &str {
        &self.config.id
    }

    fn sync_is_current(&self, instance: u64) -> bool {
        self.sync.lock().instance == instance
    }

    fn sync_begin(&self, instance: u64) {
        let mut runtime = self.sync.lock();
        if runtime.instance != instance {
            return;
        }
        runtime.batch = Some(Vec::new());
    }

    fn sync_write(&self, instance: u64, op: WriteOp) {
        let mut runtime = self.sync.lock();
        if runtime.instance != instance {
            return;
        }
        match &mut runtime.batch {
            Some(batch) => batch.push(op),
            None => warn!(collection = %self.config.id, "sync write outside begin/commit dropped"),
        }
    }

    fn sync_commit(&self, instance: u64) {
        let writes = {
            let mut runtime = self.sync.lock();
            if runtime.instance != instance {
                return;
            }
            runtime.batch.take()
        };
        match writes {
            Some(writes) => self.apply_sync_batch(writes),
            None => warn!(collection = %self.config.id, "sync commit without begin ignored"),
        }
    }

    fn sync_mark_ready(&self, instance: u64) {
        let ready = {
            let runtime = self.sync.lock();
            if runtime.instance != instance {
                return;
            }
            runtime.ready.clone()
        };
        self.transition(CollectionStatus::Ready);
        ready.resolve(Ok(()));
    }

    fn sync_fail(&self, instance: u64, error: RilletError) {
        if !self.sync_is_current(instance) {
            return;
        }
        self.fail_with(error);
    }
}

/// Per-collection transaction hook: retires or unwinds overlay entries
struct CollectionEffects {
    inner: Arc<CollectionInner>,
}

impl TransactionEffects for CollectionEffects {
    fn on_completed(&self, txn: &Transaction) {
        let collection_id = self.inner.config.id.clone();
        let keys = txn.touched_keys(&collection_id);
        if keys.is_empty() {
            return;
        }

        if self.inner.config.sync.is_some() {
            // keep shadowing until the driver confirms the keys
            let mut state = self.inner.state.write();
            for key in &keys {
                state.mark_awaiting_sync(key, txn.id());
            }
            return;
        }

        // local-only collection: write through to synced state
        let mut batch = Vec::new();
        {
            let mut state = self.inner.state.write();
            for mutation in txn.mutations() {
                if mutation.collection_id != collection_id {
                    continue;
                }
                match mutation.mutation_type {
                    MutationType::Insert | MutationType::Update => {
                        state
                            .synced
                            .insert(mutation.key.clone(), mutation.modified.clone());
                    }
                    MutationType::Delete => {
                        state.synced.remove(&mutation.key);
                    }
                }
            }
            for key in &keys {
                state.remove_overlay(key, txn.id());
                let value = state.recompute_derived(key);
                // same bytes, new authority: emit the confirmation update
                if let Some(value) = value {
                    batch.push(ChangeMessage::update(
                        key.clone(),
                        value.clone(),
                        value,
                        ChangeMeta::remote(),
                    ));
                }
            }
        }
        self.inner.subscribers.notify(&batch);
    }

    fn on_rolled_back(&self, txn: &Transaction) {
        let collection_id = self.inner.config.id.clone();
        let keys = txn.touched_keys(&collection_id);
        let mut batch = Vec::new();
        {
            let mut state = self.inner.state.write();
            for key in &keys {
                let previous = state.derived.get(key).cloned();
                if !state.remove_overlay(key, txn.id()) {
                    continue;
                }
                let restored = state.recompute_derived(key);
                let meta = if state.is_synced_authority(key) {
                    ChangeMeta::remote()
                } else {
                    let txid = state
                        .overlay
                        .get(key)
                        .and_then(|stack| stack.last())
                        .map(|entry| entry.txid)
                        .unwrap_or_else(TxId::new);
                    ChangeMeta::local(txid)
                };
                match (previous, restored) {
                    (Some(old), Some(new)) if old != new => {
                        batch.push(ChangeMessage::update(key.clone(), new, old, meta));
                    }
                    (Some(old), None) => {
                        batch.push(ChangeMessage::delete(key.clone(), old, meta));
                    }
                    (None, Some(new)) => {
                        batch.push(ChangeMessage::insert(key.clone(), new, meta));
                    }
                    _ => {}
                }
            }
        }
        self.inner.subscribers.notify(&batch);
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("len", &self.len())
            .finish()
    }
}
