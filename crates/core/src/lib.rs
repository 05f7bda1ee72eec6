//! Core types and traits for Rillet
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: unified value enum for all record data
//! - KeyValue: collection key type (string, integer, or binary)
//! - ChangeMessage: the change event shape delivered to subscribers
//! - Virtuals: the `$`-prefixed computed attributes carried on emitted rows
//! - RilletError: unified error type hierarchy
//! - Config: scheduler limits, GC and advisor thresholds
//! - Traits: consumed interfaces (schema validation, key functions) and the
//!   exposed Observer interface for devtools integrations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change;
pub mod config;
#[macro_use]
pub mod contract;
pub mod error;
pub mod key;
pub mod traits;
pub mod value;
pub mod virtuals;

// Re-export commonly used types at the crate root
pub use change::{ChangeMessage, ChangeMeta, ChangeOp, Origin, TxId, WriteOp};
pub use config::{AdvisorConfig, GcConfig, SchedulerLimits};
pub use error::{Result, RilletError};
pub use key::KeyValue;
pub use traits::{
    KeyFn, Observer, ObserverEvent, SchemaValidator, ValidationIssue, ValidationOutcome,
};
pub use value::Value;
pub use virtuals::Virtuals;
