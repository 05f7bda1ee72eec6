//! Virtual properties
//!
//! Emitted rows carry a small fixed set of `$`-prefixed computed
//! attributes. They are "add if absent": when an upstream stage already
//! stamped a row (a live query reading another live query), the existing
//! values are authoritative and pass through unchanged.
//!
//! Aggregation semantics for grouped rows:
//! - `$synced` is true iff every contributing row is synced
//! - `$origin` is `local` if any contributing row is local

use crate::change::Origin;
use crate::key::KeyValue;
use crate::value::Value;

/// Field name of the `$synced` virtual
pub const SYNCED: &str = "$synced";
/// Field name of the `$origin` virtual
pub const ORIGIN: &str = "$origin";
/// Field name of the `$key` virtual
pub const KEY: &str = "$key";
/// Field name of the `$collectionId` virtual
pub const COLLECTION_ID: &str = "$collectionId";

/// The virtual-property record stamped onto emitted rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Virtuals {
    /// Whether the row reflects confirmed synced state
    pub synced: bool,
    /// Origin of the row
    pub origin: Origin,
    /// The row's key in its collection
    pub key: KeyValue,
    /// Id of the collection that emitted the row
    pub collection_id: String,
}

impl Virtuals {
    /// Stamp the virtuals onto a row map, leaving already-present virtuals
    /// untouched
    pub fn apply(&self, row: &mut Value) {
        let map = match row.as_map_mut() {
            Some(m) => m,
            None => return,
        };
        map.entry(SYNCED.to_string())
            .or_insert(Value::Bool(self.synced));
        map.entry(ORIGIN.to_string())
            .or_insert_with(|| origin_value(self.origin));
        map.entry(KEY.to_string())
            .or_insert_with(|| self.key.to_value());
        map.entry(COLLECTION_ID.to_string())
            .or_insert_with(|| Value::Str(self.collection_id.clone()));
    }

    /// Read virtuals back off a row, if present
    pub fn read(row: &Value) -> Option<Virtuals> {
        let map = row.as_map()?;
        let synced = map.get(SYNCED)?.as_bool()?;
        let origin = match map.get(ORIGIN)?.as_str()? {
            "local" => Origin::Local,
            _ => Origin::Remote,
        };
        let key = KeyValue::from_value(map.get(KEY)?)?;
        let collection_id = map.get(COLLECTION_ID)?.as_str()?.to_string();
        Some(Virtuals {
            synced,
            origin,
            key,
            collection_id,
        })
    }
}

/// `$origin` encoding used inside rows
pub fn origin_value(origin: Origin) -> Value {
    match origin {
        Origin::Local => Value::from("local"),
        Origin::Remote => Value::from("remote"),
    }
}

/// Fold `$synced` across group members: AND
pub fn fold_synced(rows: impl IntoIterator<Item = bool>) -> bool {
    rows.into_iter().all(|s| s)
}

/// Fold `$origin` across group members: local wins
pub fn fold_origin(rows: impl IntoIterator<Item = Origin>) -> Origin {
    if rows.into_iter().any(|o| o == Origin::Local) {
        Origin::Local
    } else {
        Origin::Remote
    }
}

/// Strip virtual fields from a row, for byte-for-byte state comparisons
pub fn strip(row: &Value) -> Value {
    match row {
        Value::Map(m) => Value::Map(
            m.iter()
                .filter(|(k, _)| !k.starts_with('$'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
