//! Change messages
//!
//! A `ChangeMessage` is the unit of reactivity: collections broadcast
//! ordered batches of them to subscribers, and the dataflow compiler turns
//! them into multiset differences. Updates carry the prior value so that
//! downstream operators can retract the old row and insert the new one.

use crate::key::KeyValue;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(Uuid);

impl TxId {
    /// Generate a fresh transaction id
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        TxId(Uuid::new_v4())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0.simple())
    }
}

/// Kind of change applied to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// A new key appeared
    Insert,
    /// An existing key changed value
    Update,
    /// A key disappeared
    Delete,
}

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Applied by a local optimistic transaction
    Local,
    /// Delivered by the sync driver
    Remote,
}

/// Metadata attached to each change message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMeta {
    /// Origin of the change
    pub origin: Origin,
    /// True when the change reflects confirmed synced state
    pub synced: bool,
    /// Transaction that produced the change, for local changes
    pub txid: Option<TxId>,
}

impl ChangeMeta {
    /// Metadata for a synced (remote, confirmed) change
    pub fn remote() -> Self {
        ChangeMeta {
            origin: Origin::Remote,
            synced: true,
            txid: None,
        }
    }

    /// Metadata for a local optimistic change
    pub fn local(txid: TxId) -> Self {
        ChangeMeta {
            origin: Origin::Local,
            synced: false,
            txid: Some(txid),
        }
    }
}

/// A single change to one key of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Kind of change
    pub op: ChangeOp,
    /// Key the change applies to
    pub key: KeyValue,
    /// Value after the change. For deletes, the value that was removed.
    pub value: Value,
    /// Value before the change, present for updates
    pub previous: Option<Value>,
    /// Change metadata
    pub meta: ChangeMeta,
}

impl ChangeMessage {
    /// Insert message
    pub fn insert(key: KeyValue, value: Value, meta: ChangeMeta) -> Self {
        ChangeMessage {
            op: ChangeOp::Insert,
            key,
            value,
            previous: None,
            meta,
        }
    }

    /// Update message carrying the prior value
    pub fn update(key: KeyValue, value: Value, previous: Value, meta: ChangeMeta) -> Self {
        ChangeMessage {
            op: ChangeOp::Update,
            key,
            value,
            previous: Some(previous),
            meta,
        }
    }

    /// Delete message. `value` is the removed value.
    pub fn delete(key: KeyValue, value: Value, meta: ChangeMeta) -> Self {
        ChangeMessage {
            op: ChangeOp::Delete,
            key,
            value,
            previous: None,
            meta,
        }
    }
}

/// A single write inside a sync-driver commit batch
///
/// Drivers deliver authoritative state as `begin()`, a sequence of
/// `write(WriteOp)`, then `commit()`. The batch applies atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOp {
    /// Kind of write
    pub op: ChangeOp,
    /// Value after the write
    pub value: Value,
    /// Value before the write, when known to the driver
    pub previous: Option<Value>,
}

impl WriteOp {
    /// Insert write
    pub fn insert(value: Value) -> Self {
        WriteOp {
            op: ChangeOp::Insert,
            value,
            previous: None,
        }
    }

    /// Update write
    pub fn update(value: Value, previous: Option<Value>) -> Self {
        WriteOp {
            op: ChangeOp::Update,
            value,
            previous,
        }
    }

    /// Delete write
    pub fn delete(value: Value) -> Self {
        WriteOp {
            op: ChangeOp::Delete,
            value,
            previous: None,
        }
    }
}
