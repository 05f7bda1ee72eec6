//! Consumed and exposed interfaces
//!
//! The core consumes a handful of user-supplied callbacks (key functions,
//! schema validators) and exposes a narrow `Observer` interface for
//! devtools-style integrations. Implementations register observers
//! explicitly; there is no module-global registry.

use crate::key::KeyValue;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Key function: derives a record's key from its value
///
/// Must be pure and must produce a unique key per record within its
/// collection.
pub type KeyFn = Arc<dyn Fn(&Value) -> KeyValue + Send + Sync>;

/// One problem reported by a schema validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, empty for whole-record issues
    pub path: String,
    /// Human-readable description
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Outcome of validating a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The value is acceptable
    Success,
    /// The value was rejected
    Failure(Vec<ValidationIssue>),
}

impl ValidationOutcome {
    /// True when validation passed
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::Success)
    }

    /// Issues as plain strings, empty on success
    pub fn issue_strings(&self) -> Vec<String> {
        match self {
            ValidationOutcome::Success => Vec::new(),
            ValidationOutcome::Failure(issues) => issues.iter().map(|i| i.to_string()).collect(),
        }
    }
}

/// Schema validator applied at insert/update time, before the optimistic
/// overlay is mutated
pub trait SchemaValidator: Send + Sync {
    /// Validate a candidate value
    fn validate(&self, value: &Value) -> ValidationOutcome;
}

impl<F> SchemaValidator for F
where
    F: Fn(&Value) -> ValidationOutcome + Send + Sync,
{
    fn validate(&self, value: &Value) -> ValidationOutcome {
        self(value)
    }
}

/// Events surfaced to registered observers
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// A collection changed status
    StatusChanged {
        /// Collection id
        collection_id: String,
        /// New status name
        status: &'static str,
    },
    /// The scheduler truncated a run
    SchedulerTruncated {
        /// Steps taken before the cap fired
        steps: usize,
        /// Which cap fired
        reason: String,
    },
    /// The index advisor produced a suggestion
    IndexSuggested {
        /// Collection the suggestion is for
        collection_id: String,
        /// Structured suggestion payload
        suggestion: serde_json::Value,
    },
}

/// Narrow devtools interface
///
/// Observers receive lifecycle and advisory events. They must not call
/// back into the core from inside `notify`.
pub trait Observer: Send + Sync {
    /// Deliver one event
    fn notify(&self, event: &ObserverEvent);
}

impl<F> Observer for F
where
    F: Fn(&ObserverEvent) + Send + Sync,
{
    fn notify(&self, event: &ObserverEvent) {
        self(event)
    }
}
