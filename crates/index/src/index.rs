//! Index structures
//!
//! An index maps an extracted key value to the set of record keys holding
//! it. Two layouts:
//! - `Equality`: hash map, serves `=` and `IN`
//! - `Ordered`: B-tree, additionally serves range predicates
//!
//! The key is extracted by a compiled expression evaluated against the
//! bare record (paths are unqualified: `completed`, `owner.name`).

use parking_lot::RwLock;
use rillet_core::{ChangeMessage, ChangeOp, KeyValue, Result, Value};
use rillet_query::expr::{CompiledExpr, EvalContext, Expr, ExprCompiler};
use rillet_query::functions::FunctionRegistry;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Index layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Hash layout: equality and membership probes
    Equality,
    /// B-tree layout: equality, membership, and ranges
    Ordered,
}

enum IndexData {
    Equality(FxHashMap<Value, FxHashSet<KeyValue>>),
    Ordered(BTreeMap<Value, FxHashSet<KeyValue>>),
}

struct IndexInner {
    name: String,
    index_type: IndexType,
    key_expr: Expr,
    compiled: CompiledExpr,
    data: RwLock<IndexData>,
}

/// An index handle. Cheap to clone.
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

impl Index {
    /// Build an empty index over `key_expr`
    pub fn new(
        name: impl Into<String>,
        key_expr: Expr,
        index_type: IndexType,
        registry: &FunctionRegistry,
    ) -> Result<Self> {
        let compiled = ExprCompiler::scalar(registry).compile(&key_expr)?;
        let data = match index_type {
            IndexType::Equality => IndexData::Equality(FxHashMap::default()),
            IndexType::Ordered => IndexData::Ordered(BTreeMap::new()),
        };
        Ok(Index {
            inner: Arc::new(IndexInner {
                name: name.into(),
                index_type,
                key_expr,
                compiled,
                data: RwLock::new(data),
            }),
        })
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Layout
    pub fn index_type(&self) -> IndexType {
        self.inner.index_type
    }

    /// The expression this index extracts
    pub fn key_expr(&self) -> &Expr {
        &self.inner.key_expr
    }

    /// Dotted path of the extracted expression, when it is a plain
    /// reference (used for advisor matching)
    pub fn path(&self) -> Option<Vec<String>> {
        match &self.inner.key_expr {
            Expr::Ref(prop) => Some(prop.segments.clone()),
            _ => None,
        }
    }

    fn extract(&self, record: &Value) -> Result<Value> {
        self.inner.compiled.eval(&EvalContext::new(record), &[])
    }

    /// Maintain the index from one coherent change batch
    pub fn apply_changes(&self, changes: &[ChangeMessage]) -> Result<()> {
        let mut data = self.inner.data.write();
        for change in changes {
            match change.op {
                ChangeOp::Insert => {
                    let value = self.extract(&change.value)?;
                    insert_entry(&mut data, value, change.key.clone());
                }
                ChangeOp::Delete => {
                    let value = self.extract(&change.value)?;
                    remove_entry(&mut data, &value, &change.key);
                }
                ChangeOp::Update => {
                    if let Some(previous) = &change.previous {
                        let old_value = self.extract(previous)?;
                        remove_entry(&mut data, &old_value, &change.key);
                    }
                    let new_value = self.extract(&change.value)?;
                    insert_entry(&mut data, new_value, change.key.clone());
                }
            }
        }
        Ok(())
    }

    /// Record keys whose extracted value equals `value`
    pub fn lookup_eq(&self, value: &Value) -> Vec<KeyValue> {
        let data = self.inner.data.read();
        let set = match &*data {
            IndexData::Equality(map) => map.get(value),
            IndexData::Ordered(map) => map.get(value),
        };
        set.map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Record keys whose extracted value is any of `values`
    pub fn lookup_in(&self, values: &[Value]) -> Vec<KeyValue> {
        let mut out = Vec::new();
        for value in values {
            out.extend(self.lookup_eq(value));
        }
        out.sort();
        out.dedup();
        out
    }

    /// Ranged probe; only ordered indexes answer
    pub fn lookup_range(
        &self,
        lower: Option<(&Value, bool)>,
        upper: Option<(&Value, bool)>,
    ) -> Option<Vec<KeyValue>> {
        let data = self.inner.data.read();
        let map = match &*data {
            IndexData::Ordered(map) => map,
            IndexData::Equality(_) => return None,
        };
        let lower_bound = match lower {
            None => Bound::Unbounded,
            Some((value, true)) => Bound::Included(value.clone()),
            Some((value, false)) => Bound::Excluded(value.clone()),
        };
        let upper_bound = match upper {
            None => Bound::Unbounded,
            Some((value, true)) => Bound::Included(value.clone()),
            Some((value, false)) => Bound::Excluded(value.clone()),
        };
        let mut out = Vec::new();
        for (_, keys) in map.range((lower_bound, upper_bound)) {
            out.extend(keys.iter().cloned());
        }
        Some(out)
    }

    /// Number of distinct extracted values
    pub fn entry_count(&self) -> usize {
        match &*self.inner.data.read() {
            IndexData::Equality(map) => map.len(),
            IndexData::Ordered(map) => map.len(),
        }
    }
}

fn insert_entry(data: &mut IndexData, value: Value, key: KeyValue) {
    match data {
        IndexData::Equality(map) => {
            map.entry(value).or_default().insert(key);
        }
        IndexData::Ordered(map) => {
            map.entry(value).or_default().insert(key);
        }
    }
}

fn remove_entry(data: &mut IndexData, value: &Value, key: &KeyValue) {
    match data {
        IndexData::Equality(map) => {
            if let Some(set) = map.get_mut(value) {
                set.remove(key);
                if set.is_empty() {
                    map.remove(value);
                }
            }
        }
        IndexData::Ordered(map) => {
            if let Some(set) = map.get_mut(value) {
                set.remove(key);
                if set.is_empty() {
                    map.remove(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rillet_core::ChangeMeta;
    use rillet_query::builder::col;

    fn record(id: i64, status: &str, age: i64) -> Value {
        Value::map([
            ("id", Value::Int(id)),
            ("status", Value::from(status)),
            ("age", Value::Int(age)),
        ])
    }

    fn insert_change(id: i64, status: &str, age: i64) -> ChangeMessage {
        ChangeMessage::insert(
            KeyValue::Int(id),
            record(id, status, age),
            ChangeMeta::remote(),
        )
    }

    fn equality_index() -> Index {
        Index::new(
            "status_idx",
            col("status"),
            IndexType::Equality,
            &FunctionRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_equality_lookup() {
        let index = equality_index();
        index
            .apply_changes(&[
                insert_change(1, "open", 10),
                insert_change(2, "open", 20),
                insert_change(3, "done", 30),
            ])
            .unwrap();
        let mut keys = index.lookup_eq(&Value::from("open"));
        keys.sort();
        assert_eq!(keys, vec![KeyValue::Int(1), KeyValue::Int(2)]);
        assert!(index.lookup_eq(&Value::from("missing")).is_empty());
    }

    #[test]
    fn test_update_moves_entry() {
        let index = equality_index();
        index.apply_changes(&[insert_change(1, "open", 10)]).unwrap();
        index
            .apply_changes(&[ChangeMessage::update(
                KeyValue::Int(1),
                record(1, "done", 10),
                record(1, "open", 10),
                ChangeMeta::remote(),
            )])
            .unwrap();
        assert!(index.lookup_eq(&Value::from("open")).is_empty());
        assert_eq!(index.lookup_eq(&Value::from("done")), vec![KeyValue::Int(1)]);
    }

    #[test]
    fn test_delete_drains_value_entry() {
        let index = equality_index();
        index.apply_changes(&[insert_change(1, "open", 10)]).unwrap();
        index
            .apply_changes(&[ChangeMessage::delete(
                KeyValue::Int(1),
                record(1, "open", 10),
                ChangeMeta::remote(),
            )])
            .unwrap();
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_ordered_range_lookup() {
        let index = Index::new(
            "age_idx",
            col("age"),
            IndexType::Ordered,
            &FunctionRegistry::new(),
        )
        .unwrap();
        index
            .apply_changes(&[
                insert_change(1, "a", 10),
                insert_change(2, "b", 20),
                insert_change(3, "c", 30),
            ])
            .unwrap();
        let keys = index
            .lookup_range(Some((&Value::Int(10), false)), Some((&Value::Int(30), true)))
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys.contains(&KeyValue::Int(1)));
    }

    #[test]
    fn test_equality_index_declines_ranges() {
        let index = equality_index();
        assert!(index.lookup_range(None, None).is_none());
    }

    #[test]
    fn test_lookup_in_deduplicates() {
        let index = equality_index();
        index
            .apply_changes(&[insert_change(1, "open", 10), insert_change(2, "done", 20)])
            .unwrap();
        let keys = index.lookup_in(&[
            Value::from("open"),
            Value::from("done"),
            Value::from("open"),
        ]);
        assert_eq!(keys.len(), 2);
    }
}
