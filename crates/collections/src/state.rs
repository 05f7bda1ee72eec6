//! Three-tier collection state
//!
//! `synced` and `derived` are insertion-ordered keyed maps; the overlay is
//! a per-key stack of pending transaction entries. Derived state is
//! materialized eagerly: every synced or overlay change recomputes the
//! touched keys, so reads are plain lookups.
//!
//! Per-key collapse rule: the newest overlay entry wins; on rollback the
//! remaining stack re-applies. A key with no overlay entries reads from
//! synced state.

use rillet_core::{KeyValue, TxId, Value};
use rillet_txn::MutationType;
use rustc_hash::FxHashMap;

/// Keyed map preserving insertion order
#[derive(Debug, Default, Clone)]
pub struct OrderedMap {
    map: FxHashMap<KeyValue, Value>,
    order: Vec<KeyValue>,
}

impl OrderedMap {
    /// Lookup
    pub fn get(&self, key: &KeyValue) -> Option<&Value> {
        self.map.get(key)
    }

    /// Membership
    pub fn contains(&self, key: &KeyValue) -> bool {
        self.map.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert or replace, preserving first-insertion order
    pub fn insert(&mut self, key: KeyValue, value: Value) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push(key);
        }
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &KeyValue) -> Option<Value> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Entries in insertion order
    pub fn entries(&self) -> Vec<(KeyValue, Value)> {
        self.order
            .iter()
            .filter_map(|key| self.map.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<KeyValue> {
        self.order.clone()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

/// One pending overlay write
#[derive(Debug, Clone)]
pub struct OverlayEntry {
    /// Owning transaction
    pub txid: TxId,
    /// Kind of write
    pub mutation_type: MutationType,
    /// Value after the write; `None` for deletes
    pub value: Option<Value>,
    /// Set when the owning transaction completed and the entry only waits
    /// for synced state to catch up
    pub awaiting_sync: bool,
}

/// The three tiers
#[derive(Debug, Default)]
pub struct CollectionState {
    /// Authoritative state from the sync driver
    pub synced: OrderedMap,
    /// Pending transaction writes, stacked per key in record order
    pub overlay: FxHashMap<KeyValue, Vec<OverlayEntry>>,
    /// synced ⊕ overlay, materialized
    pub derived: OrderedMap,
}

impl CollectionState {
    /// Recompute the derived entry for one key from synced + overlay.
    /// Returns the new derived value (`None` = absent).
    pub fn recompute_derived(&mut self, key: &KeyValue) -> Option<Value> {
        let value = self.effective_value(key);
        match &value {
            Some(v) => self.derived.insert(key.clone(), v.clone()),
            None => {
                self.derived.remove(key);
            }
        }
        value
    }

    /// The value a key collapses to under the overlay rule
    pub fn effective_value(&self, key: &KeyValue) -> Option<Value> {
        if let Some(stack) = self.overlay.get(key) {
            if let Some(top) = stack.last() {
                return match top.mutation_type {
                    MutationType::Delete => None,
                    _ => top.value.clone(),
                };
            }
        }
        self.synced.get(key).cloned()
    }

    /// True when the key's derived value is backed by synced state alone
    pub fn is_synced_authority(&self, key: &KeyValue) -> bool {
        self.overlay.get(key).map_or(true, |stack| stack.is_empty())
    }

    /// Push an overlay entry for a key
    pub fn push_overlay(&mut self, key: KeyValue, entry: OverlayEntry) {
        self.overlay.entry(key).or_default().push(entry);
    }

    /// Remove one transaction's entries from a key's stack. Returns true
    /// when anything was removed.
    pub fn remove_overlay(&mut self, key: &KeyValue, txid: TxId) -> bool {
        let stack = match self.overlay.get_mut(key) {
            Some(stack) => stack,
            None => return false,
        };
        let before = stack.len();
        stack.retain(|entry| entry.txid != txid);
        let removed = stack.len() != before;
        if stack.is_empty() {
            self.overlay.remove(key);
        }
        removed
    }

    /// Mark a transaction's entries as waiting for sync confirmation
    pub fn mark_awaiting_sync(&mut self, key: &KeyValue, txid: TxId) {
        if let Some(stack) = self.overlay.get_mut(key) {
            for entry in stack.iter_mut().filter(|e| e.txid == txid) {
                entry.awaiting_sync = true;
            }
        }
    }

    /// Drop entries that were awaiting sync confirmation for this key.
    /// Called when a sync write touches the key. Returns true when the
    /// stack changed.
    pub fn retire_confirmed(&mut self, key: &KeyValue) -> bool {
        let stack = match self.overlay.get_mut(key) {
            Some(stack) => stack,
            None => return false,
        };
        let before = stack.len();
        stack.retain(|entry| !entry.awaiting_sync);
        let changed = stack.len() != before;
        if stack.is_empty() {
            self.overlay.remove(key);
        }
        changed
    }
}
