//! Collection status machine
//!
//! `idle → loading → initialCommit → ready → cleanedUp`, with `error`
//! absorbing from any state and `cleanedUp → loading` allowed when a new
//! subscription restarts the driver.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionStatus {
    /// Created, sync not started
    Idle,
    /// Sync driver started, nothing committed yet
    Loading,
    /// First sync batch committed, driver not yet ready
    InitialCommit,
    /// Driver signalled readiness
    Ready,
    /// Cleaned up; a new subscription may restart the driver
    CleanedUp,
    /// Absorbing failure state
    Error,
}

impl CollectionStatus {
    /// Name for logs and observer events
    pub fn name(self) -> &'static str {
        match self {
            CollectionStatus::Idle => "idle",
            CollectionStatus::Loading => "loading",
            CollectionStatus::InitialCommit => "initialCommit",
            CollectionStatus::Ready => "ready",
            CollectionStatus::CleanedUp => "cleanedUp",
            CollectionStatus::Error => "error",
        }
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: CollectionStatus) -> bool {
        use CollectionStatus::*;
        if self == next {
            return false;
        }
        match (self, next) {
            // error absorbs from anywhere and never leaves
            (Error, _) => false,
            (_, Error) => true,
            (Idle, Loading) => true,
            (Loading, InitialCommit) | (Loading, Ready) => true,
            (InitialCommit, Ready) => true,
            // cleanup is reachable from any live state
            (Idle, CleanedUp) | (Loading, CleanedUp) | (InitialCommit, CleanedUp)
            | (Ready, CleanedUp) => true,
            // restart after cleanup
            (CleanedUp, Loading) => true,
            _ => false,
        }
    }
}
