//! Unified value type for record data
//!
//! Every record flowing through collections and the dataflow engine is a
//! `Value`. The enum covers primitives, nested maps, lists, and raw bytes.
//!
//! `Value` carries a total order so that multiset consolidation, sorted
//! operators, and ordered indexes can sort arbitrary rows:
//! - `Null` sorts before everything else
//! - values of different variants rank by a fixed type tag
//! - floats order by `f64::total_cmp`, which also makes `Eq` and `Hash`
//!   well-defined (NaN equals NaN, -0.0 and 0.0 are distinct)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Unified value type for all record data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value. Doubles as SQL UNKNOWN in predicate evaluation.
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<Value>),
    /// Map of string field names to values. BTreeMap keeps field order
    /// deterministic, which the total order below relies on.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Rank used to order values of different variants
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 2, // numbers compare with each other
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
        }
    }

    /// True if this value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of this value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view of this value, if it is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean view of this value, if it is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view of this value, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Map view of this value, if it is a map
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Mutable map view of this value, if it is a map
    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// List view of this value, if it is a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Field lookup on a map value. Returns `None` for non-maps and missing
    /// fields alike; callers that need UNKNOWN semantics treat `None` as
    /// `Null`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(name),
            _ => None,
        }
    }

    /// Build a map value from field pairs
    pub fn map<K, I>(fields: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.iter().cmp(b.iter()),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            // Int and Float hash through the same representation so that
            // Int(2) == Float(2.0) implies equal hashes.
            Value::Int(i) => {
                2u8.hash(state);
                (*i as f64).to_bits().hash(state);
            }
            Value::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Str(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Bytes(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Value::List(l) => {
                5u8.hash(state);
                l.hash(state);
            }
            Value::Map(m) => {
                6u8.hash(state);
                for (k, v) in m {
                    k.hash(state);
                    v.hash(state);
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        let mut values = vec![
            Value::Int(1),
            Value::Null,
            Value::Str("a".into()),
            Value::Bool(false),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
    }

    #[test]
    fn test_numeric_cross_type_ordering() {
        assert_eq!(Value::Int(2).cmp(&Value::Float(2.0)), Ordering::Equal);
        assert_eq!(Value::Int(2).cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(3.0).cmp(&Value::Int(2)), Ordering::Greater);
    }

    #[test]
    fn test_int_float_equal_hash() {
        use std::collections::hash_map::DefaultHasher;
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        Value::Int(2).hash(&mut h1);
        Value::Float(2.0).hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn test_nan_is_self_equal() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
    }

    #[test]
    fn test_map_field_lookup() {
        let row = Value::map([("id", Value::Int(1)), ("text", Value::from("a"))]);
        assert_eq!(row.field("id"), Some(&Value::Int(1)));
        assert_eq!(row.field("missing"), None);
        assert_eq!(Value::Int(1).field("id"), None);
    }

    #[test]
    fn test_list_ordering_is_lexicographic() {
        let a = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::List(vec![Value::Int(1), Value::Int(3)]);
        assert!(a < b);
    }

    #[test]
    fn test_serde_round_trip() {
        let v = Value::map([
            ("id", Value::Int(7)),
            ("tags", Value::List(vec![Value::from("x"), Value::Null])),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn value_strategy() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Int),
                any::<f64>().prop_map(Value::Float),
                "[a-z]{0,6}".prop_map(Value::Str),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                    proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                        .prop_map(Value::Map),
                ]
            })
        }

        proptest! {
            #[test]
            fn prop_ordering_is_total_and_antisymmetric(
                a in value_strategy(),
                b in value_strategy(),
            ) {
                use std::cmp::Ordering;
                match a.cmp(&b) {
                    Ordering::Equal => prop_assert_eq!(&a, &b),
                    Ordering::Less => prop_assert_eq!(b.cmp(&a), Ordering::Greater),
                    Ordering::Greater => prop_assert_eq!(b.cmp(&a), Ordering::Less),
                }
            }

            #[test]
            fn prop_equal_values_hash_identically(a in value_strategy()) {
                use std::collections::hash_map::DefaultHasher;
                let b = a.clone();
                let mut ha = DefaultHasher::new();
                let mut hb = DefaultHasher::new();
                a.hash(&mut ha);
                b.hash(&mut hb);
                prop_assert_eq!(ha.finish(), hb.finish());
            }

            #[test]
            fn prop_sorting_is_stable_under_resort(mut values in proptest::collection::vec(value_strategy(), 0..16)) {
                values.sort();
                let once = values.clone();
                values.sort();
                prop_assert_eq!(once, values);
            }
        }
    }
}
