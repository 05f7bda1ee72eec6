//! Change subscription fan-out
//!
//! Subscribers receive coherent, ordered batches of change messages: one
//! callback invocation per commit boundary, never a partial transaction.
//! Indexes and live queries subscribe through the same registry as user
//! callbacks, so every consumer observes identical batches in identical
//! order.

use parking_lot::Mutex;
use rillet_core::ChangeMessage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Subscription options
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Deliver the current derived state as an initial insert batch
    pub include_initial_state: bool,
}

type Callback = Arc<dyn Fn(&[ChangeMessage]) + Send + Sync>;

struct Entry {
    id: u64,
    callback: Callback,
}

struct RegistryInner {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

/// Fan-out registry
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        SubscriberRegistry {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl SubscriberRegistry {
    /// Fresh registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; the returned subscription unsubscribes on
    /// `unsubscribe()` or drop
    pub fn subscribe(&self, callback: Callback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.entries.lock().push(Entry { id, callback });
        Subscription {
            registry: Arc::clone(&self.inner),
            id,
            active: Arc::new(AtomicBool::new(true)),
            on_unsubscribe: Mutex::new(None),
        }
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// True when nobody listens
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Deliver one coherent batch to every subscriber, in subscription
    /// order. Empty batches are suppressed.
    pub fn notify(&self, batch: &[ChangeMessage]) {
        if batch.is_empty() {
            return;
        }
        // snapshot under the lock, call outside it: callbacks may
        // subscribe or unsubscribe re-entrantly
        let callbacks: Vec<Callback> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in callbacks {
            callback(batch);
        }
    }

    /// Drop every subscriber (collection cleanup)
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

/// Handle returned by `subscribe_changes`
pub struct Subscription {
    registry: Arc<RegistryInner>,
    id: u64,
    active: Arc<AtomicBool>,
    on_unsubscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Install a hook that runs once when this subscription ends (the
    /// collection uses it to drive GC scheduling)
    pub(crate) fn set_on_unsubscribe(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_unsubscribe.lock() = Some(Box::new(hook));
    }

    /// Stop receiving change batches
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.registry.entries.lock().retain(|entry| entry.id != self.id);
        if let Some(hook) = self.on_unsubscribe.lock().take() {
            hook();
        }
    }

    /// Whether this subscription still receives batches
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rillet_core::{ChangeMeta, KeyValue, Value};

    fn message(i: i64) -> ChangeMessage {
        ChangeMessage::insert(KeyValue::Int(i), Value::Int(i), ChangeMeta::remote())
    }

    #[test]
    fn test_notify_reaches_all_subscribers_in_order() {
        let registry = SubscriberRegistry::new();
        let log: Arc<Mutex<Vec<(u8, usize)>>> = Arc::new(Mutex::new(Vec::new()));

        let log_a = Arc::clone(&log);
        let _a = registry.subscribe(Arc::new(move |batch| {
            log_a.lock().push((b'a', batch.len()));
        }));
        let log_b = Arc::clone(&log);
        let _b = registry.subscribe(Arc::new(move |batch| {
            log_b.lock().push((b'b', batch.len()));
        }));

        registry.notify(&[message(1), message(2)]);
        assert_eq!(log.lock().as_slice(), &[(b'a', 2), (b'b', 2)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(Mutex::new(0usize));
        let h = Arc::clone(&hits);
        let sub = registry.subscribe(Arc::new(move |_| {
            *h.lock() += 1;
        }));
        registry.notify(&[message(1)]);
        sub.unsubscribe();
        registry.notify(&[message(2)]);
        assert_eq!(*hits.lock(), 1);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_drop_unsubscribes_and_runs_hook() {
        let registry = SubscriberRegistry::new();
        let hook_ran = Arc::new(AtomicBool::new(false));
        {
            let sub = registry.subscribe(Arc::new(|_| {}));
            let flag = Arc::clone(&hook_ran);
            sub.set_on_unsubscribe(move || flag.store(true, Ordering::SeqCst));
            assert_eq!(registry.len(), 1);
        }
        assert_eq!(registry.len(), 0);
        assert!(hook_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_empty_batches_are_suppressed() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(Mutex::new(0usize));
        let h = Arc::clone(&hits);
        let _sub = registry.subscribe(Arc::new(move |_| {
            *h.lock() += 1;
        }));
        registry.notify(&[]);
        assert_eq!(*hits.lock(), 0);
    }
}
