//! Live query collections
//!
//! A live query collection is a `Collection` whose sync driver is a
//! compiled dataflow graph. On start the driver preloads the referenced
//! source collections, feeds their snapshots through the graph, and
//! applies the sink's consolidated output as synced-state commits. Source
//! change batches stream through the same path afterwards, one pump per
//! source commit, so every live commit is coherent with exactly one
//! upstream commit.
//!
//! Initial snapshots go through the source's index catalog: a WHERE
//! predicate resolvable by an index prunes the snapshot feed (the filter
//! chain still applies downstream, so pruning only skips rows that could
//! never match). The advisor hears about scans the catalog could not
//! help with.

use crate::collection::{Collection, CollectionConfig};
use crate::subscribers::{SubscribeOptions, Subscription};
use crate::sync::{CleanupHandle, SyncContext, SyncDriver};
use parking_lot::Mutex;
use rillet_core::{
    ChangeMessage, ChangeOp, GcConfig, KeyFn, KeyValue, Origin, Result, RilletError,
    SchedulerLimits, Value, WriteOp,
};
use rillet_dataflow::multiset::MultiSet;
use rillet_query::compiler::{compile, CompiledQuery};
use rillet_query::functions::FunctionRegistry;
use rillet_query::predicates::{analyze_filters, IndexablePredicate};
use rillet_query::Query;
use rillet_index::ScanPlan;
use rillet_core::virtuals::{self, Virtuals};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Configuration for a live query collection
pub struct LiveQueryConfig {
    /// Collection id; generated when absent
    pub id: Option<String>,
    /// The query
    pub query: Query,
    /// Result key function; defaults to the row's `$key` virtual
    pub get_key: Option<KeyFn>,
    /// GC policy
    pub gc: GcConfig,
    /// Compile and start the graph at construction instead of on first
    /// subscription
    pub start_sync: bool,
    /// Scheduler limits for the compiled graph
    pub limits: SchedulerLimits,
}

impl LiveQueryConfig {
    /// Defaults around a query
    pub fn new(query: Query) -> Self {
        LiveQueryConfig {
            id: None,
            query,
            get_key: None,
            gc: GcConfig::default(),
            start_sync: false,
            limits: SchedulerLimits::default(),
        }
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set an explicit result key function
    pub fn with_get_key(mut self, get_key: KeyFn) -> Self {
        self.get_key = Some(get_key);
        self
    }

    /// Override GC policy
    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    /// Start eagerly
    pub fn start_sync_immediate(mut self) -> Self {
        self.start_sync = true;
        self
    }

    /// Override scheduler limits
    pub fn with_limits(mut self, limits: SchedulerLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Build a live query collection over the given source collections.
/// Every collection id the query references must appear in `sources`.
pub fn create_live_query_collection(
    config: LiveQueryConfig,
    sources: &[Collection],
) -> Result<Collection> {
    let mut resolved: FxHashMap<String, Collection> = FxHashMap::default();
    for (collection_id, _alias) in config.query.collection_aliases() {
        if resolved.contains_key(&collection_id) {
            continue;
        }
        let source = sources
            .iter()
            .find(|c| c.id() == collection_id)
            .ok_or_else(|| {
                RilletError::invalid_input(format!(
                    "query references unknown collection '{collection_id}'"
                ))
            })?;
        resolved.insert(collection_id, source.clone());
    }

    let functions = sources
        .first()
        .map(|c| c.functions())
        .unwrap_or_else(|| Arc::new(FunctionRegistry::new()));

    let id = config
        .id
        .unwrap_or_else(|| format!("live:{}", Uuid::new_v4().simple()));
    let get_key = config.get_key.unwrap_or_else(|| Arc::new(default_result_key));

    let driver = Arc::new(GraphSyncDriver {
        query: config.query,
        sources: resolved,
        functions,
        limits: config.limits,
    });

    let mut collection_config = CollectionConfig::new(id, get_key)
        .with_sync(driver)
        .with_gc(config.gc);
    if config.start_sync {
        collection_config = collection_config.start_sync_immediate();
    }
    Ok(Collection::new(collection_config))
}

/// Default result key: the row's `$key` virtual, composite keys encoded
/// as a canonical string
fn default_result_key(row: &Value) -> KeyValue {
    let key_value = row.field(virtuals::KEY).unwrap_or(row);
    encode_result_key(key_value)
}

fn encode_result_key(value: &Value) -> KeyValue {
    match value {
        Value::Str(s) => KeyValue::from(s.as_str()),
        Value::Int(i) => KeyValue::Int(*i),
        Value::Bytes(b) => KeyValue::from(b.as_slice()),
        other => {
            // composite keys (joins, group keys) encode deterministically
            let encoded = serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}"));
            KeyValue::from(encoded)
        }
    }
}

/// Sync driver backed by a compiled dataflow graph
struct GraphSyncDriver {
    query: Query,
    sources: FxHashMap<String, Collection>,
    functions: Arc<FunctionRegistry>,
    limits: SchedulerLimits,
}

impl SyncDriver for GraphSyncDriver {
    fn start(&self, ctx: SyncContext) -> Result<CleanupHandle> {
        // sources must be loaded before their snapshots are read
        for source in self.sources.values() {
            source.preload()?;
        }

        let compiled = compile(&self.query, &self.functions, self.limits)?;
        let input_count = compiled.inputs.len();
        let pump = Arc::new(PumpState {
            compiled: Mutex::new(compiled),
            fed: Mutex::new(vec![FxHashMap::default(); input_count]),
            results: Mutex::new(FxHashMap::default()),
            ctx,
        });

        // group input feeds by source collection: one subscription per
        // collection, every alias fed before the pump runs
        let by_collection: Vec<(String, Vec<usize>)> = {
            let compiled = pump.compiled.lock();
            let mut grouped: Vec<(String, Vec<usize>)> = Vec::new();
            for (index, input) in compiled.inputs.iter().enumerate() {
                match grouped
                    .iter_mut()
                    .find(|(id, _)| *id == input.collection_id)
                {
                    Some((_, indices)) => indices.push(index),
                    None => grouped.push((input.collection_id.clone(), vec![index])),
                }
            }
            grouped
        };

        let predicates = analyze_filters(&self.query.filters);
        let mut subscriptions: Vec<Subscription> = Vec::new();

        for (collection_id, indices) in &by_collection {
            let source = self
                .sources
                .get(collection_id)
                .expect("resolved at construction")
                .clone();

            // subscribe first so no commit can slip between snapshot and
            // subscription; the snapshot is fed manually below
            let pump_ref = Arc::clone(&pump);
            let source_id = collection_id.clone();
            let feed_indices = indices.clone();
            let subscription = source.subscribe_changes(
                move |batch| pump_ref.ingest(&feed_indices, &source_id, batch),
                SubscribeOptions::default(),
            );
            subscriptions.push(subscription);

            self.feed_initial(&pump, &source, indices, &predicates);
        }

        // drive the graph over the snapshots, then report readiness
        pump.run_and_apply();
        pump.ctx.mark_ready();
        debug!(sources = by_collection.len(), "live query started");

        Ok(Box::new(move || {
            drop(subscriptions);
        }))
    }
}

impl GraphSyncDriver {
    /// Feed one source's snapshot into every alias session it backs,
    /// pruned through the index catalog when a WHERE predicate allows
    fn feed_initial(
        &self,
        pump: &Arc<PumpState>,
        source: &Collection,
        indices: &[usize],
        predicates: &[IndexablePredicate],
    ) {
        let snapshot = source.initial_state_batch();
        let compiled = pump.compiled.lock();
        for &index in indices {
            let alias = compiled.inputs[index].alias.clone();
            let plan = source.catalog().plan_scan(&alias, predicates);
            if let Some(advisor) = source.advisor() {
                advisor.record_scan(source.catalog(), source.len(), predicates);
            }
            let batch: Vec<ChangeMessage> = match &plan {
                ScanPlan::Full => snapshot.clone(),
                ScanPlan::Keys(keys) => {
                    debug!(
                        collection = source.id(),
                        alias = %alias,
                        keys = keys.len(),
                        "index-pruned initial scan"
                    );
                    snapshot
                        .iter()
                        .filter(|message| keys.contains(&message.key))
                        .cloned()
                        .collect()
                }
            };
            let mut fed = pump.fed.lock();
            let diffs = convert_changes(&batch, &mut fed[index], source.id());
            compiled.inputs[index].session.send(diffs);
        }
    }
}

/// Shared pump: converts change batches to differences, runs the graph,
/// and applies sink output as sync commits on the live collection
struct PumpState {
    compiled: Mutex<CompiledQuery>,
    /// per input: last stamped row fed per source key, so retractions
    /// cancel exactly what was inserted
    fed: Mutex<Vec<FxHashMap<KeyValue, Value>>>,
    /// sink state: stream key -> current row
    results: Mutex<FxHashMap<Value, Value>>,
    ctx: SyncContext,
}

impl PumpState {
    fn ingest(&self, indices: &[usize], source_id: &str, batch: &[ChangeMessage]) {
        {
            let compiled = self.compiled.lock();
            let mut fed = self.fed.lock();
            for &index in indices {
                let diffs = convert_changes(batch, &mut fed[index], source_id);
                compiled.inputs[index].session.send(diffs);
            }
        }
        self.run_and_apply();
    }

    fn run_and_apply(&self) {
        let mut compiled = self.compiled.lock();
        if let Err(error) = compiled.graph.run() {
            self.ctx.fail(error);
            return;
        }
        let output = compiled.output.drain();
        if output.is_empty() {
            return;
        }
        let has_union = compiled.has_union;
        drop(compiled);

        // fold sink differences per stream key
        let mut per_key: BTreeMap<Value, Vec<(Value, isize)>> = BTreeMap::new();
        for ((key, row), diff) in output.into_entries() {
            per_key.entry(key).or_default().push((row, diff));
        }

        let mut results = self.results.lock();
        self.ctx.begin();
        for (key, changes) in per_key {
            let current = results.get(&key).cloned();
            let mut counts: BTreeMap<Value, isize> = BTreeMap::new();
            if let Some(row) = &current {
                counts.insert(row.clone(), 1);
            }
            for (row, diff) in changes {
                *counts.entry(row).or_insert(0) += diff;
            }
            counts.retain(|_, count| *count > 0);

            if counts.len() > 1 {
                let conflict_key = encode_result_key(&key);
                let error = if has_union {
                    RilletError::KeyConflict {
                        collection_id: self.ctx.collection_id(),
                        key: conflict_key,
                    }
                } else {
                    RilletError::internal(format!(
                        "result key {conflict_key} resolved to {} rows",
                        counts.len()
                    ))
                };
                self.ctx.fail(error);
                return;
            }

            let next = counts.into_keys().next();
            match (current, next) {
                (None, Some(row)) => {
                    results.insert(key, row.clone());
                    self.ctx.write(WriteOp::insert(row));
                }
                (Some(previous), Some(row)) => {
                    if previous != row {
                        results.insert(key, row.clone());
                        self.ctx.write(WriteOp::update(row, Some(previous)));
                    }
                }
                (Some(previous), None) => {
                    results.remove(&key);
                    self.ctx.write(WriteOp::delete(previous));
                }
                (None, None) => {}
            }
        }
        self.ctx.commit();
    }
}

/// Convert one source change batch into stamped differences for a single
/// alias feed
fn convert_changes(
    batch: &[ChangeMessage],
    fed: &mut FxHashMap<KeyValue, Value>,
    source_id: &str,
) -> MultiSet<(Value, Value)> {
    let mut out = MultiSet::new();
    for message in batch {
        let key_value = message.key.to_value();
        match message.op {
            ChangeOp::Insert | ChangeOp::Update => {
                if let Some(old) = fed.get(&message.key) {
                    out.push((key_value.clone(), old.clone()), -1);
                }
                let stamped = stamp(message, source_id);
                fed.insert(message.key.clone(), stamped.clone());
                out.push((key_value, stamped), 1);
            }
            ChangeOp::Delete => {
                if let Some(old) = fed.remove(&message.key) {
                    out.push((key_value, old), -1);
                }
            }
        }
    }
    out
}

fn stamp(message: &ChangeMessage, source_id: &str) -> Value {
    let mut row = message.value.clone();
    Virtuals {
        synced: message.meta.synced,
        origin: message.meta.origin,
        key: message.key.clone(),
        collection_id: source_id.to_string(),
    }
    .apply(&mut row);
    row
}

/// Whether any row of a batch is locally originated (used by tests and
/// diagnostics)
pub fn batch_has_local_origin(batch: &[ChangeMessage]) -> bool {
    batch.iter().any(|m| m.meta.origin == Origin::Local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::CollectionStatus;
    use rillet_query::builder::{col, eq, lit, QueryBuilder};

    fn todo(id: i64, text: &str, completed: bool) -> Value {
        Value::map([
            ("id", Value::Int(id)),
            ("text", Value::from(text)),
            ("completed", Value::Bool(completed)),
        ])
    }

    fn source(id: &str) -> Collection {
        Collection::new(CollectionConfig::keyed_by_id(id).with_gc(GcConfig::disabled()))
    }

    fn pending_query(source_id: &str) -> Query {
        QueryBuilder::from(source_id, "t")
            .where_(eq(col("t.completed"), lit(false)))
            .build()
    }

    #[test]
    fn test_live_query_initial_snapshot() {
        let todos = source("todos");
        todos.insert(todo(1, "a", false)).unwrap();
        todos.insert(todo(2, "b", true)).unwrap();

        let live = create_live_query_collection(
            LiveQueryConfig::new(pending_query("todos")).with_gc(GcConfig::disabled()),
            &[todos.clone()],
        )
        .unwrap();
        live.preload().unwrap();

        assert_eq!(live.status(), CollectionStatus::Ready);
        assert_eq!(live.len(), 1);
        let row = live.find_one().unwrap();
        assert_eq!(row.field("text"), Some(&Value::from("a")));
        assert_eq!(row.field(virtuals::SYNCED), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_live_query_tracks_source_changes() {
        let todos = source("todos");
        let live = create_live_query_collection(
            LiveQueryConfig::new(pending_query("todos")).with_gc(GcConfig::disabled()),
            &[todos.clone()],
        )
        .unwrap();
        live.preload().unwrap();
        assert!(live.is_empty());

        todos.insert(todo(1, "a", false)).unwrap();
        assert_eq!(live.len(), 1);

        // completing the todo removes it from the pending view
        todos
            .update(&KeyValue::Int(1), |draft| {
                if let Some(map) = draft.as_map_mut() {
                    map.insert("completed".to_string(), Value::Bool(true));
                }
            })
            .unwrap();
        assert!(live.is_empty());
    }

    #[test]
    fn test_live_query_change_messages() {
        let todos = source("todos");
        let live = create_live_query_collection(
            LiveQueryConfig::new(pending_query("todos")).with_gc(GcConfig::disabled()),
            &[todos.clone()],
        )
        .unwrap();
        live.preload().unwrap();

        let log: Arc<Mutex<Vec<ChangeOp>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _sub = live.subscribe_changes(
            move |batch| sink.lock().extend(batch.iter().map(|m| m.op)),
            SubscribeOptions::default(),
        );

        todos.insert(todo(1, "a", false)).unwrap();
        todos
            .update(&KeyValue::Int(1), |draft| {
                if let Some(map) = draft.as_map_mut() {
                    map.insert("completed".to_string(), Value::Bool(true));
                }
            })
            .unwrap();

        let ops = log.lock();
        // optimistic insert arrives, then it leaves the view on update;
        // write-through confirmations may add updates in between
        assert_eq!(ops.first(), Some(&ChangeOp::Insert));
        assert_eq!(ops.last(), Some(&ChangeOp::Delete));
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let err = create_live_query_collection(
            LiveQueryConfig::new(pending_query("nope")),
            &[source("todos")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_union_key_conflict_fails_preload() {
        let a = source("a");
        let b = source("b");
        a.insert(Value::map([("id", Value::Int(5))])).unwrap();
        b.insert(Value::map([("id", Value::Int(5))])).unwrap();

        let query = QueryBuilder::from("a", "x")
            .union(QueryBuilder::from("b", "y").build())
            .build();
        let live = create_live_query_collection(
            LiveQueryConfig::new(query).with_gc(GcConfig::disabled()),
            &[a, b],
        )
        .unwrap();
        let err = live.preload().unwrap_err();
        assert!(live.status() == CollectionStatus::Error);
        assert!(err.to_string().contains("conflict") || err.to_string().contains('5'));
        assert!(matches!(
            live.latest_error().as_deref(),
            Some(RilletError::KeyConflict { .. })
        ));
    }

    #[test]
    fn test_encode_result_key_variants() {
        assert_eq!(encode_result_key(&Value::Int(5)), KeyValue::Int(5));
        assert_eq!(encode_result_key(&Value::from("k")), KeyValue::from("k"));
        let composite = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let encoded = encode_result_key(&composite);
        // deterministic: same composite encodes identically
        assert_eq!(encoded, encode_result_key(&composite));
    }
}
