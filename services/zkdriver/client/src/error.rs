//! Coordination client error types.

use thiserror::Error;

/// Errors raised by a coordination backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// Node does not exist
    #[error("node not found: {0}")]
    NoNode(String),

    /// Node already exists
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// Conditional write rejected because the node version moved
    #[error("version conflict on {path}: expected {expected}, found {actual:?}")]
    BadVersion {
        /// Node path
        path: String,
        /// Version the caller expected
        expected: i32,
        /// Version currently stored, when the backend reports it
        actual: Option<i32>,
    },

    /// Node still has children
    #[error("node has children: {0}")]
    NotEmpty(String),

    /// Malformed node path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Malformed connection parameters
    #[error("invalid connection spec: {0}")]
    InvalidSpec(String),

    /// Transport to the ensemble failed or timed out
    #[error("connection loss: {0}")]
    ConnectionLoss(String),

    /// Session was closed or expired
    #[error("session closed")]
    SessionClosed,

    /// Backend-specific error
    #[error("backend error: {0}")]
    Backend(String),
}

impl CoordinationError {
    /// Whether this error is a transport/session fault rather than a node-level outcome
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionLoss(_)
                | CoordinationError::SessionClosed
                | CoordinationError::Backend(_)
        )
    }
}
