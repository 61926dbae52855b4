//! Error taxonomy for the bridge.
//!
//! Two kinds of failure exist:
//!
//! - [`BridgeError::UnsupportedOperation`] is raised synchronously when code
//!   tries to dispatch directly onto an execution context from within itself.
//! - [`BridgeError::OperationFailed`] wraps the first [`OperationFailure`]
//!   captured while a bridge scope was draining. Later failures in the same
//!   scope are logged and discarded.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Identifies one operation submitted to an execution context.
///
/// Identifiers are assigned in submission order, starting at 1, and are only
/// unique within a single context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) u64);

impl OperationId {
    /// Returns the raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// A failure raised by an operation running on the bridge (or launched with
/// fire-and-forget).
///
/// The original cause is kept intact and exposed through
/// [`std::error::Error::source`] and [`OperationFailure::cause`].
#[derive(Debug)]
pub struct OperationFailure {
    operation: Option<OperationId>,
    panicked: bool,
    cause: anyhow::Error,
}

impl OperationFailure {
    pub(crate) fn from_error(operation: Option<OperationId>, cause: anyhow::Error) -> Self {
        Self {
            operation,
            panicked: false,
            cause,
        }
    }

    pub(crate) fn from_panic(
        operation: Option<OperationId>,
        payload: Box<dyn Any + Send + 'static>,
    ) -> Self {
        Self {
            operation,
            panicked: true,
            cause: anyhow::anyhow!(panic_message(payload.as_ref())),
        }
    }

    /// The operation that failed. `None` for detached (fire-and-forget) work
    /// and for raw callbacks posted onto a context.
    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }

    /// Returns true if the failure was a panic rather than a returned error.
    pub fn is_panic(&self) -> bool {
        self.panicked
    }

    /// The original cause.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Consumes the failure, returning the original cause.
    pub fn into_cause(self) -> anyhow::Error {
        self.cause
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.panicked { "panicked" } else { "failed" };
        match self.operation {
            Some(id) => write!(f, "operation {id} {outcome}: {}", self.cause),
            None => write!(f, "detached work {outcome}: {}", self.cause),
        }
    }
}

impl std::error::Error for OperationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Async bridge run failed: {0}")]
    OperationFailed(#[source] OperationFailure),

    #[error("Execution context is already being drained")]
    AlreadyDraining,

    #[error("Failed to spawn background work: {0}")]
    Spawn(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation completed without delivering its value")]
    MissingValue,

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns the captured operation failure, if this error carries one.
    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            Self::OperationFailed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Consumes the error, returning the captured operation failure.
    pub fn into_failure(self) -> Option<OperationFailure> {
        match self {
            Self::OperationFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_operation_id_display() {
        assert_eq!(OperationId(7).to_string(), "op-7");
        assert_eq!(OperationId(7).get(), 7);
    }

    #[test]
    fn test_failure_keeps_original_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let failure = OperationFailure::from_error(Some(OperationId(3)), io.into());

        assert_eq!(failure.operation(), Some(OperationId(3)));
        assert!(!failure.is_panic());
        assert_eq!(failure.to_string(), "operation op-3 failed: missing file");

        let source = failure.source().expect("failure should expose its cause");
        assert_eq!(source.to_string(), "missing file");
        assert!(failure.cause().downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_panic_payloads_are_described() {
        let from_str = OperationFailure::from_panic(None, Box::new("boom"));
        assert!(from_str.is_panic());
        assert_eq!(from_str.to_string(), "detached work panicked: boom");

        let from_string = OperationFailure::from_panic(Some(OperationId(1)), Box::new(String::from("bad state")));
        assert_eq!(from_string.to_string(), "operation op-1 panicked: bad state");

        let opaque = OperationFailure::from_panic(None, Box::new(42_u8));
        assert!(opaque.to_string().contains("non-string panic payload"));
    }

    #[test]
    fn test_bridge_error_exposes_failure() {
        let failure = OperationFailure::from_error(Some(OperationId(2)), anyhow::anyhow!("nope"));
        let err = BridgeError::OperationFailed(failure);

        assert_eq!(err.failure().and_then(|f| f.operation()), Some(OperationId(2)));
        assert!(err.to_string().contains("nope"));
        assert!(err.source().is_some());

        let cause = err.into_failure().map(OperationFailure::into_cause);
        assert_eq!(cause.map(|c| c.to_string()), Some("nope".to_string()));

        assert!(BridgeError::AlreadyDraining.failure().is_none());
    }
}
