//! Error types for the monitoring engine.
//!
//! Session terminations are classified separately as
//! [`FailureKind`](crate::session::FailureKind); `MonitorError` covers
//! everything else: transport and handshake failures while they are still
//! in-flight, sourcetable fetch problems, and supervisor bookkeeping.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

/// Main error type for the monitoring engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MonitorError {
    #[error("Failed to connect to caster: {reason}")]
    Connect {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Caster rejected the request: {status}")]
    Handshake { status: String },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Sourcetable fetch failed: {reason}")]
    Sourcetable { reason: String },

    #[error("No station configured with id '{id}'")]
    StationNotFound { id: String },

    #[error("Shutdown timed out with {pending} session(s) still running")]
    ShutdownTimeout { pending: usize },
}

impl MonitorError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            MonitorError::Connect { .. } => true,
            MonitorError::Io { .. } => true,
            MonitorError::Timeout { .. } => true,
            MonitorError::Handshake { .. } => false,
            MonitorError::Parse { .. } => false,
            MonitorError::Sourcetable { .. } => true,
            MonitorError::StationNotFound { .. } => false,
            MonitorError::ShutdownTimeout { .. } => false,
        }
    }

    /// Helper constructor for connect failures.
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        MonitorError::Connect { reason: reason.into(), source: None }
    }

    /// Helper constructor for connect failures with an underlying cause.
    pub fn connect_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        MonitorError::Connect { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with operation context.
    pub fn io_error(context: impl Into<String>, source: std::io::Error) -> Self {
        MonitorError::Io { context: context.into(), source }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        MonitorError::Parse { context: context.into(), details: details.into() }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io { context: "socket".to_string(), source: err }
    }
}

impl From<tokio::time::error::Elapsed> for MonitorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MonitorError::Timeout { duration: Duration::ZERO }
    }
}
