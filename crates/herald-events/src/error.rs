use herald_core::SubscriptionId;
use thiserror::Error;

use crate::types::{Signature, VarianceViolation};

/// Failure reported by a single callback target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The target returned an error.
    #[error("{0}")]
    Failed(String),

    /// The target panicked; the payload message is kept when it is a string.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// One target's failure during a `fire`, with its position in the snapshot.
#[derive(Debug, Clone, Error)]
#[error("target `{target}` (#{index}) failed: {source}")]
pub struct TargetInvocationError {
    /// Zero-based position of the target in the dispatch snapshot.
    pub index: usize,
    pub target: String,
    pub subscription: SubscriptionId,
    #[source]
    pub source: CallbackError,
}

/// Every target failure collected by a best-effort `fire`.
#[derive(Debug, Clone, Error)]
#[error("{} target(s) failed while dispatching `{event}`", .errors.len())]
pub struct AggregateDispatchError {
    pub event: String,
    pub errors: Vec<TargetInvocationError>,
}

impl AggregateDispatchError {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            errors: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn push(&mut self, err: TargetInvocationError) {
        self.errors.push(err);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetInvocationError> {
        self.errors.iter()
    }
}

/// Why a `fire` did not complete cleanly.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Fail-fast stopped at the first failing target.
    #[error("dispatch of `{event}` aborted after {} target(s): {error}", .invoked.len())]
    Aborted {
        event: String,
        error: TargetInvocationError,
        /// Names of the targets that completed successfully before the failure, in order.
        invoked: Vec<String>,
        /// Targets in the snapshot that were never attempted (or were aborted).
        remaining: usize,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateDispatchError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Aborted { .. } => "DISPATCH_ABORTED",
            DispatchError::Aggregate(_) => "DISPATCH_FAILED",
        }
    }

    /// All target failures carried by this error, in snapshot order.
    pub fn failures(&self) -> Vec<&TargetInvocationError> {
        match self {
            DispatchError::Aborted { error, .. } => vec![error],
            DispatchError::Aggregate(agg) => agg.iter().collect(),
        }
    }
}

/// Errors raised when binding targets or declaring events and types.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("signature mismatch on `{event}`: expected {expected}, found {found} ({violation})")]
    SignatureMismatch {
        event: String,
        expected: Signature,
        found: Signature,
        violation: VarianceViolation,
    },

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("invalid type `{name}`: {reason}")]
    InvalidType { name: String, reason: String },
}

impl EventError {
    pub fn code(&self) -> &'static str {
        match self {
            EventError::SignatureMismatch { .. } => "SIGNATURE_MISMATCH",
            EventError::UnknownType(_) => "UNKNOWN_TYPE",
            EventError::InvalidType { .. } => "INVALID_TYPE",
        }
    }
}

pub type Result<T> = std::result::Result<T, EventError>;
