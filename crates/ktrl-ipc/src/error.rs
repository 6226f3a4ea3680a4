//! Error taxonomy shared by the command and notification clients.
//!
//! The codec never produces errors; everything here originates from the
//! transport or from calling a client out of order.

use std::time::Duration;

use crate::endpoint::Endpoint;

/// Errors surfaced by the IPC clients and daemon-side endpoints.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The endpoint is unreachable, malformed, or the transport failed.
    /// Fatal to the current connection, never to the process.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// No reply arrived within the configured window. The connection is
    /// unusable afterwards and must be re-established.
    #[error("no reply from {endpoint} within {after:?}")]
    Timeout { endpoint: Endpoint, after: Duration },

    /// The caller broke the request/reply lock-step.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The operation was attempted or interrupted after an explicit close.
    #[error("connection closed")]
    Closed,
}

impl IpcError {
    pub(crate) fn connection(endpoint: impl ToString, reason: impl ToString) -> Self {
        Self::Connection {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Whether a fresh `connect` may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IpcError>;
