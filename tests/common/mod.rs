//! Shared helpers for integration tests
#![allow(dead_code)] // each test binary uses a different subset

use parking_lot::Mutex;
use rillet::{
    ChangeMessage, CleanupHandle, Collection, CollectionConfig, GcConfig, KeyValue, Result,
    SubscribeOptions, SyncContext, SyncDriver, Value, WriteOp,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Route tracing output through the test harness once per process
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A todo record
pub fn todo(id: i64, text: &str, completed: bool) -> Value {
    Value::map([
        ("id", Value::Int(id)),
        ("text", Value::from(text)),
        ("completed", Value::Bool(completed)),
    ])
}

/// An int key
pub fn key(i: i64) -> KeyValue {
    KeyValue::Int(i)
}

/// A local-only collection keyed by `id`, GC off
pub fn local_collection(id: &str) -> Collection {
    Collection::new(CollectionConfig::keyed_by_id(id).with_gc(GcConfig::disabled()))
}

/// Remote control for a `ScriptedDriver`
#[derive(Clone, Default)]
pub struct DriverHandle {
    ctx: Arc<Mutex<Option<SyncContext>>>,
    starts: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl DriverHandle {
    /// Push one committed batch through the current driver instance
    pub fn commit(&self, writes: Vec<WriteOp>) {
        let guard = self.ctx.lock();
        let ctx = guard.as_ref().expect("driver started");
        ctx.begin();
        for write in writes {
            ctx.write(write);
        }
        ctx.commit();
    }

    /// The context of the most recent start (stale after a restart)
    pub fn context(&self) -> SyncContext {
        self.ctx.lock().clone().expect("driver started")
    }

    /// How many times the driver started
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// How many cleanups ran
    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// Sync driver scripted by tests: feeds fixed initial batches, marks
/// ready, then leaves the context available for later commits
pub struct ScriptedDriver {
    initial: Vec<Vec<WriteOp>>,
    handle: DriverHandle,
}

impl ScriptedDriver {
    pub fn new(initial: Vec<Vec<WriteOp>>) -> (Arc<Self>, DriverHandle) {
        let handle = DriverHandle::default();
        (
            Arc::new(ScriptedDriver {
                initial,
                handle: handle.clone(),
            }),
            handle,
        )
    }
}

impl SyncDriver for ScriptedDriver {
    fn start(&self, ctx: SyncContext) -> Result<CleanupHandle> {
        self.handle.starts.fetch_add(1, Ordering::SeqCst);
        for batch in &self.initial {
            ctx.begin();
            for write in batch {
                ctx.write(write.clone());
            }
            ctx.commit();
        }
        ctx.mark_ready();
        *self.handle.ctx.lock() = Some(ctx);
        let cleanups = Arc::clone(&self.handle.cleanups);
        Ok(Box::new(move || {
            cleanups.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Record every change batch a collection emits
pub struct BatchLog {
    batches: Arc<Mutex<Vec<Vec<ChangeMessage>>>>,
    _subscription: rillet::Subscription,
}

impl BatchLog {
    pub fn attach(collection: &Collection) -> Self {
        let batches: Arc<Mutex<Vec<Vec<ChangeMessage>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let subscription = collection.subscribe_changes(
            move |batch| sink.lock().push(batch.to_vec()),
            SubscribeOptions::default(),
        );
        BatchLog {
            batches,
            _subscription: subscription,
        }
    }

    pub fn batches(&self) -> Vec<Vec<ChangeMessage>> {
        self.batches.lock().clone()
    }

    pub fn messages(&self) -> Vec<ChangeMessage> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

/// Strip virtual fields (`$`-prefixed, including the order index) for
/// plain value comparisons
pub fn stripped(row: &Value) -> Value {
    match row {
        Value::Map(map) => Value::Map(
            map.iter()
                .filter(|(field, _)| !field.starts_with('$'))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
