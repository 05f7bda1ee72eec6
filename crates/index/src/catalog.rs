//! Index catalog and scan planning
//!
//! One catalog per collection. The planner matches extracted WHERE
//! predicates against the catalog: an indexable predicate whose path has a
//! matching index resolves to a key probe; everything else falls back to a
//! full scan with the predicate staying in the filter chain.

use crate::index::{Index, IndexType};
use parking_lot::RwLock;
use rillet_core::{KeyValue, Result, RilletError};
use rillet_query::builder::col;
use rillet_query::functions::FunctionRegistry;
use rillet_query::predicates::IndexablePredicate;
use rillet_query::Expr;
use std::sync::Arc;

/// How the initial load of a query source should read the collection
#[derive(Debug, Clone)]
pub enum ScanPlan {
    /// Feed the whole snapshot
    Full,
    /// Feed only the keys an index resolved. The residual filter chain
    /// still applies downstream, so over-approximation is harmless but
    /// under-approximation is not: the keys must be a superset of the
    /// matching rows for the resolved predicate.
    Keys(Vec<KeyValue>),
}

struct CatalogInner {
    collection_id: String,
    indexes: RwLock<Vec<Index>>,
}

/// Per-collection index catalog
#[derive(Clone)]
pub struct IndexCatalog {
    inner: Arc<CatalogInner>,
}

impl IndexCatalog {
    /// Empty catalog for a collection
    pub fn new(collection_id: impl Into<String>) -> Self {
        IndexCatalog {
            inner: Arc::new(CatalogInner {
                collection_id: collection_id.into(),
                indexes: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Collection this catalog serves
    pub fn collection_id(&self) -> &str {
        &self.inner.collection_id
    }

    /// Create and register an index over `key_expr`
    pub fn create_index(
        &self,
        key_expr: Expr,
        index_type: IndexType,
        registry: &FunctionRegistry,
    ) -> Result<Index> {
        let name = match &key_expr {
            Expr::Ref(prop) => format!("{}_{}_idx", self.collection_id(), prop.segments.join("_")),
            _ => format!("{}_expr_idx", self.collection_id()),
        };
        let mut indexes = self.inner.indexes.write();
        if indexes.iter().any(|existing| existing.name() == name) {
            return Err(RilletError::invalid_input(format!(
                "index '{name}' already exists"
            )));
        }
        let index = Index::new(name, key_expr, index_type, registry)?;
        indexes.push(index.clone());
        tracing::debug!(
            collection = %self.collection_id(),
            index = index.name(),
            "index created"
        );
        Ok(index)
    }

    /// Shorthand: index a dotted field path
    pub fn create_field_index(
        &self,
        path: &str,
        index_type: IndexType,
        registry: &FunctionRegistry,
    ) -> Result<Index> {
        self.create_index(col(path), index_type, registry)
    }

    /// Registered indexes
    pub fn indexes(&self) -> Vec<Index> {
        self.inner.indexes.read().clone()
    }

    /// Find an index able to answer a predicate
    pub fn resolve(&self, predicate: &IndexablePredicate) -> Option<Index> {
        let indexes = self.inner.indexes.read();
        indexes
            .iter()
            .find(|index| {
                let path = match index.path() {
                    Some(path) => path,
                    None => return false,
                };
                if path != predicate.path() {
                    return false;
                }
                match predicate {
                    IndexablePredicate::Eq { .. } | IndexablePredicate::In { .. } => true,
                    IndexablePredicate::Range { .. } => index.index_type() == IndexType::Ordered,
                }
            })
            .cloned()
    }

    /// Plan the initial scan for a set of predicates scoped to `alias`.
    /// The first resolvable predicate wins; the rest stay residual.
    pub fn plan_scan(&self, alias: &str, predicates: &[IndexablePredicate]) -> ScanPlan {
        for predicate in predicates.iter().filter(|p| p.alias() == alias) {
            if let Some(index) = self.resolve(predicate) {
                let keys = match predicate {
                    IndexablePredicate::Eq { value, .. } => index.lookup_eq(value),
                    IndexablePredicate::In { values, .. } => index.lookup_in(values),
                    IndexablePredicate::Range { lower, upper, .. } => {
                        match index.lookup_range(
                            lower.as_ref().map(|b| (&b.value, b.inclusive)),
                            upper.as_ref().map(|b| (&b.value, b.inclusive)),
                        ) {
                            Some(keys) => keys,
                            None => continue,
                        }
                    }
                };
                return ScanPlan::Keys(keys);
            }
        }
        ScanPlan::Full
    }
}
