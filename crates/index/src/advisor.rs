//! Dev-mode index advisor
//!
//! Counts full scans per `(collection, expression path)`. When a
//! collection is past the size threshold and the same unindexed expression
//! keeps forcing full scans, the advisor emits one structured suggestion:
//! a warning log with a JSON payload, plus a notification to registered
//! observers. Each suggestion fires once.

use parking_lot::Mutex;
use rillet_core::{AdvisorConfig, Observer, ObserverEvent};
use rillet_query::predicates::IndexablePredicate;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::warn;

use crate::catalog::IndexCatalog;

#[derive(Default)]
struct AdvisorState {
    scan_counts: FxHashMap<(String, String), usize>,
    suggested: FxHashSet<(String, String)>,
}

/// Scan-frequency watcher
pub struct Advisor {
    config: AdvisorConfig,
    state: Mutex<AdvisorState>,
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl Advisor {
    /// Advisor with the given thresholds
    pub fn new(config: AdvisorConfig) -> Self {
        Advisor {
            config,
            state: Mutex::new(AdvisorState::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for `IndexSuggested` events
    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.lock().push(observer);
    }

    /// Record a query's scan against a collection. `collection_len` is the
    /// derived size at scan time; predicates that the catalog could not
    /// resolve count toward a suggestion.
    pub fn record_scan(
        &self,
        catalog: &IndexCatalog,
        collection_len: usize,
        predicates: &[IndexablePredicate],
    ) {
        if !self.config.enabled {
            return;
        }
        for predicate in predicates {
            if catalog.resolve(predicate).is_some() {
                continue;
            }
            let path = predicate.path().join(".");
            let slot = (catalog.collection_id().to_string(), path.clone());
            let mut state = self.state.lock();
            if state.suggested.contains(&slot) {
                continue;
            }
            let count = state.scan_counts.entry(slot.clone()).or_insert(0);
            *count += 1;
            let count = *count;
            if count >= self.config.scan_threshold
                && collection_len >= self.config.min_collection_size
            {
                state.suggested.insert(slot);
                drop(state);
                self.emit(catalog.collection_id(), &path, count, collection_len);
            }
        }
    }

    fn emit(&self, collection_id: &str, path: &str, scans: usize, collection_len: usize) {
        let suggestion = serde_json::json!({
            "collection": collection_id,
            "field": path,
            "fullScans": scans,
            "collectionSize": collection_len,
            "hint": format!(
                "queries repeatedly filter '{collection_id}' on '{path}' without an index; \
                 consider create_index(col(\"{path}\"))"
            ),
        });
        warn!(
            collection = collection_id,
            field = path,
            scans,
            size = collection_len,
            "unindexed field is scanned frequently"
        );
        let event = ObserverEvent::IndexSuggested {
            collection_id: collection_id.to_string(),
            suggestion,
        };
        for observer in self.observers.lock().iter() {
            observer.notify(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use rillet_query::builder::{col, eq, lit};
    use rillet_query::predicates::analyze_filters;

    fn config() -> AdvisorConfig {
        AdvisorConfig::default()
            .with_enabled(true)
            .with_min_collection_size(100)
            .with_scan_threshold(3)
    }

    struct Recorder {
        events: PlMutex<Vec<String>>,
    }

    impl Observer for Recorder {
        fn notify(&self, event: &ObserverEvent) {
            if let ObserverEvent::IndexSuggested { collection_id, .. } = event {
                self.events.lock().push(collection_id.clone());
            }
        }
    }

    #[test]
    fn test_suggestion_after_threshold() {
        let advisor = Advisor::new(config());
        let recorder = Arc::new(Recorder {
            events: PlMutex::new(Vec::new()),
        });
        advisor.register_observer(recorder.clone());

        let catalog = IndexCatalog::new("todos");
        let predicates = analyze_filters(&[eq(col("t.status"), lit("open"))]);

        advisor.record_scan(&catalog, 5_000, &predicates);
        advisor.record_scan(&catalog, 5_000, &predicates);
        assert!(recorder.events.lock().is_empty());
        advisor.record_scan(&catalog, 5_000, &predicates);
        assert_eq!(recorder.events.lock().as_slice(), ["todos"]);

        // fires once
        advisor.record_scan(&catalog, 5_000, &predicates);
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[test]
    fn test_small_collections_never_trigger() {
        let advisor = Advisor::new(config());
        let recorder = Arc::new(Recorder {
            events: PlMutex::new(Vec::new()),
        });
        advisor.register_observer(recorder.clone());
        let catalog = IndexCatalog::new("todos");
        let predicates = analyze_filters(&[eq(col("t.status"), lit("open"))]);
        for _ in 0..10 {
            advisor.record_scan(&catalog, 10, &predicates);
        }
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_indexed_predicates_do_not_count() {
        let advisor = Advisor::new(config());
        let recorder = Arc::new(Recorder {
            events: PlMutex::new(Vec::new()),
        });
        advisor.register_observer(recorder.clone());
        let registry = rillet_query::functions::FunctionRegistry::new();
        let catalog = IndexCatalog::new("todos");
        catalog
            .create_field_index("status", crate::index::IndexType::Equality, &registry)
            .unwrap();
        let predicates = analyze_filters(&[eq(col("t.status"), lit("open"))]);
        for _ in 0..10 {
            advisor.record_scan(&catalog, 5_000, &predicates);
        }
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_disabled_advisor_is_silent() {
        let advisor = Advisor::new(config().with_enabled(false));
        let recorder = Arc::new(Recorder {
            events: PlMutex::new(Vec::new()),
        });
        advisor.register_observer(recorder.clone());
        let catalog = IndexCatalog::new("todos");
        let predicates = analyze_filters(&[eq(col("t.status"), lit("open"))]);
        for _ in 0..10 {
            advisor.record_scan(&catalog, 5_000, &predicates);
        }
        assert!(recorder.events.lock().is_empty());
    }
}
