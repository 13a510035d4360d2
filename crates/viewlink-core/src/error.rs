//! Shared error type across viewlink crates.

use thiserror::Error;

/// Stable error codes (used in HTTP bodies, logs and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid input that is not an envelope (config, wire message, location).
    BadRequest,
    /// Envelope missing or carrying invalid tag fields.
    MalformedEnvelope,
    /// Caller-applied bound elapsed before the frame took a delivery.
    TransportTimeout,
    /// No live registration for the addressed child.
    DeadTarget,
    /// Connection already torn down.
    Closed,
    /// Unsupported protocol or config version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::MalformedEnvelope => "MALFORMED_ENVELOPE",
            ErrorCode::TransportTimeout => "TRANSPORT_TIMEOUT",
            ErrorCode::DeadTarget => "DEAD_TARGET",
            ErrorCode::Closed => "CLOSED",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ViewLinkError>;

/// Unified error type used by core and relay.
#[derive(Debug, Error)]
pub enum ViewLinkError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("transport timeout after {waited_ms}ms")]
    TransportTimeout { waited_ms: u64 },
    #[error("dead target: {0}")]
    DeadTarget(String),
    #[error("connection closed")]
    Closed,
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl ViewLinkError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ViewLinkError::BadRequest(_) => ErrorCode::BadRequest,
            ViewLinkError::MalformedEnvelope(_) => ErrorCode::MalformedEnvelope,
            ViewLinkError::TransportTimeout { .. } => ErrorCode::TransportTimeout,
            ViewLinkError::DeadTarget(_) => ErrorCode::DeadTarget,
            ViewLinkError::Closed => ErrorCode::Closed,
            ViewLinkError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            ViewLinkError::Internal(_) => ErrorCode::Internal,
        }
    }
}
