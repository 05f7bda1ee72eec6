//! Collection key type
//!
//! Keys identify records within a collection and are produced by the
//! user-supplied key function. Strings and integers compare by content.
//! Binary keys compare by content up to 128 bytes; larger binaries fall
//! back to reference identity (the `Arc` pointer), since content hashing
//! arbitrarily large identifiers on every map probe is not acceptable on
//! the hot path.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Largest binary key normalized by content. Larger keys use the identity
/// of their backing allocation.
pub const MAX_INLINE_KEY_BYTES: usize = 128;

/// Key of a record within a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyValue {
    /// String key
    Str(Arc<str>),
    /// Integer key
    Int(i64),
    /// Binary key
    Bytes(Arc<[u8]>),
}

impl KeyValue {
    /// True if this is a binary key beyond the content-identity limit
    fn is_reference_identity(&self) -> bool {
        matches!(self, KeyValue::Bytes(b) if b.len() > MAX_INLINE_KEY_BYTES)
    }

    /// The key as a `Value`, for embedding into emitted rows (`$key`)
    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::Str(s) => Value::Str(s.to_string()),
            KeyValue::Int(i) => Value::Int(*i),
            KeyValue::Bytes(b) => Value::Bytes(b.to_vec()),
        }
    }

    /// Derive a key from a value, when the value is key-shaped
    pub fn from_value(value: &Value) -> Option<KeyValue> {
        match value {
            Value::Str(s) => Some(KeyValue::from(s.as_str())),
            Value::Int(i) => Some(KeyValue::Int(*i)),
            Value::Bytes(b) => Some(KeyValue::Bytes(Arc::from(b.as_slice()))),
            _ => None,
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyValue::Str(a), KeyValue::Str(b)) => a == b,
            (KeyValue::Int(a), KeyValue::Int(b)) => a == b,
            (KeyValue::Bytes(a), KeyValue::Bytes(b)) => {
                if self.is_reference_identity() || other.is_reference_identity() {
                    Arc::ptr_eq(a, b)
                } else {
                    a == b
                }
            }
            _ => false,
        }
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            KeyValue::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            KeyValue::Int(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            KeyValue::Bytes(b) => {
                2u8.hash(state);
                if b.len() > MAX_INLINE_KEY_BYTES {
                    (Arc::as_ptr(b) as *const u8 as usize).hash(state);
                } else {
                    b.hash(state);
                }
            }
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(k: &KeyValue) -> u8 {
            match k {
                KeyValue::Int(_) => 0,
                KeyValue::Str(_) => 1,
                KeyValue::Bytes(_) => 2,
            }
        }
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a.cmp(b),
            (KeyValue::Str(a), KeyValue::Str(b)) => a.cmp(b),
            (KeyValue::Bytes(a), KeyValue::Bytes(b)) => {
                if self.is_reference_identity() || other.is_reference_identity() {
                    (Arc::as_ptr(a) as *const u8 as usize)
                        .cmp(&(Arc::as_ptr(b) as *const u8 as usize))
                } else {
                    a.cmp(b)
                }
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Str(s) => write!(f, "{}", s),
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Bytes(b) => write!(f, "0x{}", hex_prefix(b)),
        }
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Str(Arc::from(s))
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        KeyValue::Str(Arc::from(s.as_str()))
    }
}

impl From<i64> for KeyValue {
    fn from(i: i64) -> Self {
        KeyValue::Int(i)
    }
}

impl From<&[u8]> for KeyValue {
    fn from(b: &[u8]) -> Self {
        KeyValue::Bytes(Arc::from(b))
    }
}
