//! Sync driver protocol
//!
//! The driver feeds authoritative state into a collection through a
//! `SyncContext`: `begin()`, a sequence of `write(..)`, `commit()`. Each
//! batch applies atomically. `mark_ready()` signals (once) that the first
//! load is complete.
//!
//! Every driver start gets a fresh context carrying an instance token.
//! All context calls are validated against the collection's current
//! instance: a context held by a stale driver (one that was cleaned up
//! while a restart was already in flight) is ignored rather than allowed
//! to corrupt the new instance's state. Cleanup is scoped the same way:
//! the handle returned by `start` belongs to that instance alone.

use rillet_core::{Result, RilletError, WriteOp};
use tracing::debug;

/// Async-capable cleanup for one driver instance
pub type CleanupHandle = Box<dyn FnOnce() + Send>;

/// The external interface a sync source implements
pub trait SyncDriver: Send + Sync {
    /// Start feeding the collection. The returned cleanup runs when the
    /// collection is cleaned up or restarted; it must only cancel work
    /// belonging to this start call.
    fn start(&self, ctx: SyncContext) -> Result<CleanupHandle>;
}

/// What a context call needs from its collection. Implemented by
/// `Collection`; the indirection keeps drivers decoupled from the
/// concrete collection type.
pub trait SyncTarget: Send + Sync {
    /// Id of the collection being fed
    fn sync_collection_id(&self) -> &str;
    /// Open a batch for the given driver instance
    fn sync_begin(&self, instance: u64);
    /// Append one write to the open batch
    fn sync_write(&self, instance: u64, op: WriteOp);
    /// Atomically apply the open batch
    fn sync_commit(&self, instance: u64);
    /// First load complete
    fn sync_mark_ready(&self, instance: u64);
    /// Fatal driver failure
    fn sync_fail(&self, instance: u64, error: RilletError);
    /// Whether the instance is still current
    fn sync_is_current(&self, instance: u64) -> bool;
}

/// Handle a driver writes through
pub struct SyncContext {
    target: std::sync::Arc<dyn SyncTarget>,
    instance: u64,
}

impl SyncContext {
    pub(crate) fn new(target: std::sync::Arc<dyn SyncTarget>, instance: u64) -> Self {
        SyncContext { target, instance }
    }

    /// The instance token this context belongs to
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Id of the collection this context feeds
    pub fn collection_id(&self) -> String {
        self.target.sync_collection_id().to_string()
    }

    /// True while this context's driver instance is the collection's
    /// current one
    pub fn is_current(&self) -> bool {
        self.target.sync_is_current(self.instance)
    }

    /// Open an atomic batch
    pub fn begin(&self) {
        if !self.is_current() {
            debug!(instance = self.instance, "stale sync begin ignored");
            return;
        }
        self.target.sync_begin(self.instance);
    }

    /// Append a write to the open batch
    pub fn write(&self, op: WriteOp) {
        if !self.is_current() {
            debug!(instance = self.instance, "stale sync write ignored");
            return;
        }
        self.target.sync_write(self.instance, op);
    }

    /// Apply the open batch atomically
    pub fn commit(&self) {
        if !self.is_current() {
            debug!(instance = self.instance, "stale sync commit ignored");
            return;
        }
        self.target.sync_commit(self.instance);
    }

    /// Signal that the first load is complete. Later commits need not
    /// re-signal; repeated calls are idempotent.
    pub fn mark_ready(&self) {
        if !self.is_current() {
            debug!(instance = self.instance, "stale mark_ready ignored");
            return;
        }
        self.target.sync_mark_ready(self.instance);
    }

    /// Report a fatal driver failure; the collection transitions to
    /// `error`
    pub fn fail(&self, error: RilletError) {
        if !self.is_current() {
            return;
        }
        self.target.sync_fail(self.instance, error);
    }
}

impl Clone for SyncContext {
    fn clone(&self) -> Self {
        SyncContext {
            target: std::sync::Arc::clone(&self.target),
            instance: self.instance,
        }
    }
}
