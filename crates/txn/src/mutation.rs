//! Mutations
//!
//! A mutation is one keyed write recorded by a transaction. The ordered
//! list of mutations is what persistence handlers receive, and what the
//! optimistic overlay replays per key.

use rillet_core::{ChangeOp, KeyValue, TxId, Value};
use serde::{Deserialize, Serialize};

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationType {
    /// Create a new record
    Insert,
    /// Replace an existing record
    Update,
    /// Remove a record
    Delete,
}

impl MutationType {
    /// The change-message op this mutation produces
    pub fn change_op(self) -> ChangeOp {
        match self {
            MutationType::Insert => ChangeOp::Insert,
            MutationType::Update => ChangeOp::Update,
            MutationType::Delete => ChangeOp::Delete,
        }
    }
}

/// One keyed write within a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Collection the write targets
    pub collection_id: String,
    /// Kind of write
    pub mutation_type: MutationType,
    /// Key of the affected record
    pub key: KeyValue,
    /// Record value after the write. For deletes, the removed value.
    pub modified: Value,
    /// Record value before the write, for updates and deletes
    pub original: Option<Value>,
    /// Partial field diff for updates, when the caller supplied one
    pub changes: Option<Value>,
    /// Transaction this mutation belongs to
    pub txid: TxId,
}

impl Mutation {
    /// Insert mutation
    pub fn insert(collection_id: impl Into<String>, key: KeyValue, value: Value, txid: TxId) -> Self {
        Mutation {
            collection_id: collection_id.into(),
            mutation_type: MutationType::Insert,
            key,
            modified: value,
            original: None,
            changes: None,
            txid,
        }
    }

    /// Update mutation carrying the prior value
    pub fn update(
        collection_id: impl Into<String>,
        key: KeyValue,
        modified: Value,
        original: Value,
        changes: Option<Value>,
        txid: TxId,
    ) -> Self {
        Mutation {
            collection_id: collection_id.into(),
            mutation_type: MutationType::Update,
            key,
            modified,
            original: Some(original),
            changes,
            txid,
        }
    }

    /// Delete mutation carrying the removed value
    pub fn delete(
        collection_id: impl Into<String>,
        key: KeyValue,
        original: Value,
        txid: TxId,
    ) -> Self {
        Mutation {
            collection_id: collection_id.into(),
            mutation_type: MutationType::Delete,
            key: key.clone(),
            modified: original.clone(),
            original: Some(original),
            changes: None,
            txid,
        }
    }
}
