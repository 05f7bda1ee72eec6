//! Error types for Rillet
//!
//! `RilletError` is the unified error type across all crates. We use
//! `thiserror` for `Display`/`Error` derivation.
//!
//! ## Error Categories
//!
//! - **Validation**: schema validator rejected a value; surfaced
//!   synchronously from the mutate call
//! - **KeyConflict**: duplicate key under a Union at runtime
//! - **SyncDriver**: the driver failed during start or commit
//! - **Graph**: an operator evaluator failed inside a dataflow graph
//! - **Persistence**: the mutation function rejected; the transaction rolls
//!   back
//! - **IterationCap**: the scheduler truncated a fixpoint (kept as a
//!   warning, the graph stays live)
//! - **ContractViolation**: an internal invariant check failed (debug
//!   builds only)
//!
//! Errors raised inside user-provided callbacks (evaluators, key functions,
//! mutation functions) are captured at the boundary and converted into the
//! kinds above with the original cause attached as a string.

use crate::key::KeyValue;
use thiserror::Error;

/// Result type alias for Rillet operations
pub type Result<T> = std::result::Result<T, RilletError>;

/// Unified error type for all Rillet operations
#[derive(Debug, Error)]
pub enum RilletError {
    /// Schema validator rejected a value before overlay application
    #[error("validation failed for collection '{collection_id}': {issues:?}")]
    Validation {
        /// Collection the insert/update targeted
        collection_id: String,
        /// Issues reported by the validator
        issues: Vec<String>,
    },

    /// Duplicate key surfaced by a Union at runtime
    #[error("key conflict in '{collection_id}': duplicate key {key}")]
    KeyConflict {
        /// Live query collection that detected the conflict
        collection_id: String,
        /// The duplicated key
        key: KeyValue,
    },

    /// Sync driver failed during start or commit
    #[error("sync driver error in '{collection_id}': {message}")]
    SyncDriver {
        /// Collection whose driver failed
        collection_id: String,
        /// Failure description, with the original cause when available
        message: String,
    },

    /// Operator evaluator failed inside a dataflow graph
    #[error("graph error in operator '{operator}': {message}")]
    Graph {
        /// Name of the operator that failed
        operator: String,
        /// Failure description
        message: String,
    },

    /// Mutation function rejected a transaction
    #[error("persistence failed for {txid}: {message}")]
    Persistence {
        /// The failed transaction
        txid: crate::change::TxId,
        /// Failure description from the handler
        message: String,
    },

    /// Scheduler truncated a fixpoint. Partial results are kept and the
    /// graph remains live; this kind is logged, not fatal.
    #[error("iteration cap exceeded after {steps} steps ({reason})")]
    IterationCap {
        /// Steps taken before truncation
        steps: usize,
        /// Which cap fired
        reason: String,
    },

    /// Internal invariant check failed (non-production builds)
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Operation not valid for the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Input parameters are invalid; retrying cannot help
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected internal error, indicates a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl RilletError {
    /// Create a Validation error
    pub fn validation(collection_id: impl Into<String>, issues: Vec<String>) -> Self {
        RilletError::Validation {
            collection_id: collection_id.into(),
            issues,
        }
    }

    /// Create a KeyConflict error
    pub fn key_conflict(collection_id: impl Into<String>, key: KeyValue) -> Self {
        RilletError::KeyConflict {
            collection_id: collection_id.into(),
            key,
        }
    }

    /// Create a SyncDriver error
    pub fn sync_driver(collection_id: impl Into<String>, message: impl Into<String>) -> Self {
        RilletError::SyncDriver {
            collection_id: collection_id.into(),
            message: message.into(),
        }
    }

    /// Create a Graph error
    pub fn graph(operator: impl Into<String>, message: impl Into<String>) -> Self {
        RilletError::Graph {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Create a Persistence error
    pub fn persistence(txid: crate::change::TxId, message: impl Into<String>) -> Self {
        RilletError::Persistence {
            txid,
            message: message.into(),
        }
    }

    /// Create an IterationCap error
    pub fn iteration_cap(steps: usize, reason: impl Into<String>) -> Self {
        RilletError::IterationCap {
            steps,
            reason: reason.into(),
        }
    }

    /// Create an InvalidState error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        RilletError::InvalidState(message.into())
    }

    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        RilletError::InvalidInput(message.into())
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        RilletError::Internal(message.into())
    }

    /// True for errors a caller may reasonably retry: persistence failures
    /// (the mutation can be re-committed) and truncated fixpoints (a later
    /// run may converge).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RilletError::Persistence { .. } | RilletError::IterationCap { .. }
        )
    }

    /// True for validation errors, which indicate bad input rather than a
    /// failed operation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            RilletError::Validation { .. } | RilletError::InvalidInput(_)
        )
    }

    /// True for errors that indicate a bug or broken invariant
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            RilletError::ContractViolation(_) | RilletError::Internal(_)
        )
    }

    /// True for errors that transition a collection to `error` status
    pub fn is_fatal_for_collection(&self) -> bool {
        matches!(
            self,
            RilletError::KeyConflict { .. }
                | RilletError::SyncDriver { .. }
                | RilletError::Graph { .. }
        )
    }
}
