//! The error taxonomy shared by every AMCP component (component C9).
//!
//! Each crate in the workspace defines its own narrower `thiserror` enum for
//! its internal failure modes (`amcp_topic::PatternError`,
//! `amcp_broker::BrokerError`, ...) and converts into [`AmcpError`] at its
//! public boundary, mirroring how `llmspell-events` keeps `PublishError` and
//! `SubscribeError` separate from the crate-wide umbrella.

use std::fmt;

use thiserror::Error;

/// The failure kinds enumerated by the error taxonomy.
///
/// See the retryability column: only [`ErrorKind::BrokerUnavailable`],
/// [`ErrorKind::BackpressureError`] and transient [`ErrorKind::HandlerError`]
/// are retried by reliable delivery (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Event or pattern malformed.
    ValidationError,
    /// e.g. activate on `DESTROYED`.
    IllegalLifecycleTransition,
    /// Broker stopped or transport down.
    BrokerUnavailable,
    /// Reliable queue full past timeout.
    BackpressureError,
    /// User handler code raised.
    HandlerError,
    /// Callback / migration / orchestration deadline exceeded.
    TimeoutError,
    /// Dispatch failed; agent remains at source.
    MigrationAborted,
    /// Orchestrator cannot route a task to any capability.
    CapabilityNotFound,
    /// Auth or policy interceptor rejected the operation.
    SecurityDenied,
    /// Operation was cancelled before completion.
    Cancelled,
}

impl ErrorKind {
    /// Whether this kind is retryable by reliable delivery, absent an
    /// explicit per-error `transient` override (used for [`ErrorKind::HandlerError`]).
    #[must_use]
    pub const fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable | Self::BackpressureError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ValidationError => "ValidationError",
            Self::IllegalLifecycleTransition => "IllegalLifecycleTransition",
            Self::BrokerUnavailable => "BrokerUnavailable",
            Self::BackpressureError => "BackpressureError",
            Self::HandlerError => "HandlerError",
            Self::TimeoutError => "TimeoutError",
            Self::MigrationAborted => "MigrationAborted",
            Self::CapabilityNotFound => "CapabilityNotFound",
            Self::SecurityDenied => "SecurityDenied",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// The umbrella error type returned at every AMCP component boundary.
///
/// Carries the [`ErrorKind`], a human-readable message, an optional
/// correlation id (§7 "futures resolve with the error kind + a
/// human-readable message + the correlation id ... to aid tracing") and
/// whether this particular occurrence should be retried.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct AmcpError {
    kind: ErrorKind,
    message: String,
    correlation_id: Option<String>,
    retryable: bool,
}

impl AmcpError {
    /// Construct a new error of the given kind with the default
    /// retryability for that kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.default_retryable();
        Self {
            kind,
            message: message.into(),
            correlation_id: None,
            retryable,
        }
    }

    /// Override whether this specific occurrence is retryable, used for
    /// `HandlerError` when the failing handler marked itself transient.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a correlation id for tracing across a request chain.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The correlation id, if this error occurred within a correlated
    /// request chain.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Whether this occurrence should be retried by reliable delivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Convenience constructor for [`ErrorKind::ValidationError`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    /// Convenience constructor for [`ErrorKind::IllegalLifecycleTransition`].
    pub fn illegal_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalLifecycleTransition, message)
    }

    /// Convenience constructor for [`ErrorKind::Cancelled`].
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Convenience constructor for [`ErrorKind::TimeoutError`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }
}

/// Result alias used throughout the AMCP workspace's public APIs.
pub type Result<T> = std::result::Result<T, AmcpError>;

impl From<String> for AmcpError {
    fn from(message: String) -> Self {
        Self::new(ErrorKind::HandlerError, message)
    }
}

impl From<&str> for AmcpError {
    fn from(message: &str) -> Self {
        Self::new(ErrorKind::HandlerError, message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retryable_matches_taxonomy() {
        assert!(ErrorKind::BrokerUnavailable.default_retryable());
        assert!(ErrorKind::BackpressureError.default_retryable());
        assert!(!ErrorKind::ValidationError.default_retryable());
        assert!(!ErrorKind::HandlerError.default_retryable());
    }

    #[test]
    fn builder_attaches_correlation_id() {
        let err = AmcpError::validation("bad topic").with_correlation_id("corr-1");
        assert_eq!(err.correlation_id(), Some("corr-1"));
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn handler_error_can_be_marked_transient() {
        let err = AmcpError::new(ErrorKind::HandlerError, "boom").with_retryable(true);
        assert!(err.is_retryable());
    }
}
