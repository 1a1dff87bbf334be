//! Dispatch error taxonomy.
//!
//! Registration-time errors (`DuplicateTransform`, `UnsupportedTransformShape`)
//! abort wiring. Every other variant is raised while processing one exchange
//! and is recorded on that exchange as a [`Fault`](crate::exchange::Fault).

use std::fmt;

use crate::exchange::ExchangeState;
use crate::format::PayloadFormat;

/// Which side of an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSide {
    /// The backing operation body returned an error.
    Target,
    /// The dispatcher could not call the operation (argument count or type mismatch).
    Framework,
}

impl fmt::Display for FailureSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => f.write_str("target"),
            Self::Framework => f.write_str("framework"),
        }
    }
}

/// Errors raised while wiring transforms or dispatching an exchange.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("no operation name declared on exchange {request_id}")]
    OperationNameMissing { request_id: String },

    #[error("operation `{operation}` on service `{service}` matched {candidates} candidates, expected exactly one")]
    OperationNotResolved {
        service: String,
        operation: String,
        candidates: usize,
    },

    #[error("no transform registered from `{from}` to `{to}`")]
    NoTransformFound { from: PayloadFormat, to: PayloadFormat },

    #[error("duplicate transform registration from `{from}` to `{to}`")]
    DuplicateTransform { from: PayloadFormat, to: PayloadFormat },

    #[error("transform method `{method}` has an unsupported shape: {reason}")]
    UnsupportedTransformShape { method: String, reason: String },

    #[error("transform from `{from}` to `{to}` failed")]
    TransformFailed {
        from: PayloadFormat,
        to: PayloadFormat,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation `{operation}` failed on the {side} side")]
    InvocationFailed {
        operation: String,
        side: FailureSide,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation `{operation}` exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { operation: String, timeout_ms: u64 },

    #[error("unknown service: {name}")]
    UnknownService { name: String },

    #[error("dispatcher overloaded, try again later")]
    Overloaded,

    #[error("exchange {request_id} is {state}, cannot {action}")]
    ExchangeClosed {
        request_id: String,
        state: ExchangeState,
        action: &'static str,
    },
}

impl DispatchError {
    /// Stable identifier used in logs, metrics and fault payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OperationNameMissing { .. } => "operation_name_missing",
            Self::OperationNotResolved { .. } => "operation_not_resolved",
            Self::NoTransformFound { .. } => "no_transform_found",
            Self::DuplicateTransform { .. } => "duplicate_transform",
            Self::UnsupportedTransformShape { .. } => "unsupported_transform_shape",
            Self::TransformFailed { .. } => "transform_failed",
            Self::InvocationFailed { .. } => "invocation_failed",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::UnknownService { .. } => "unknown_service",
            Self::Overloaded => "overloaded",
            Self::ExchangeClosed { .. } => "exchange_closed",
        }
    }

    /// Whether this error belongs to transform registration rather than to
    /// the processing of a single exchange.
    #[must_use]
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTransform { .. } | Self::UnsupportedTransformShape { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_errors_are_flagged() {
        let dup = DispatchError::DuplicateTransform {
            from: PayloadFormat::new("a"),
            to: PayloadFormat::new("b"),
        };
        assert!(dup.is_registration());
        assert_eq!(dup.code(), "duplicate_transform");
        assert_eq!(dup.to_string(), "duplicate transform registration from `a` to `b`");

        assert!(!DispatchError::Overloaded.is_registration());
    }

    #[test]
    fn invocation_failure_keeps_its_source() {
        let err = DispatchError::InvocationFailed {
            operation: "createOrder".to_string(),
            side: FailureSide::Target,
            source: anyhow::anyhow!("inventory unavailable"),
        };
        assert_eq!(err.to_string(), "operation `createOrder` failed on the target side");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("inventory unavailable"));
    }
}
