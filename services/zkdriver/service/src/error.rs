//! Caller-facing error taxonomy.

use std::fmt;
use thiserror::Error;
use tracing::{error, info, Level};
use zkdriver_client::CoordinationError;
use zkdriver_pool::PoolError;

/// Errors returned by the node and client services
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Empty key, path or data; a caller bug
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Session establishment exhausted its retries
    #[error("connect failed for {key} after {attempts} attempt(s): {source}")]
    ConnectFailed {
        /// Session key being established
        key: String,
        /// Attempts made
        attempts: u32,
        /// Error of the last attempt
        source: CoordinationError,
    },

    /// No live session for the key; the caller must re-acquire
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Handle no longer held by the pool
    #[error("unknown handle: {0}")]
    UnknownHandle(String),

    /// Node does not exist
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Node already exists
    #[error("node already exists: {0}")]
    NodeAlreadyExists(String),

    /// Node version moved since it was read
    #[error("version conflict on {path}: expected version {expected}")]
    VersionConflict {
        /// Node path
        path: String,
        /// Version the write was conditioned on
        expected: i32,
    },

    /// Node still has children
    #[error("node not empty: {0}")]
    NotEmpty(String),

    /// Transport or session fault on an otherwise valid session
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// No catalog record for the server info id
    #[error("server info {0} not found")]
    ServerNotFound(i64),

    /// Catalog lookup failed
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl ServiceError {
    /// Expected outcomes handed straight back to the caller without failure logging
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidArgument(_)
                | ServiceError::NodeNotFound(_)
                | ServiceError::NodeAlreadyExists(_)
                | ServiceError::VersionConflict { .. }
                | ServiceError::NotEmpty(_)
                | ServiceError::ServerNotFound(_)
        )
    }

    /// Level a failed call is logged at: business outcomes at info, the rest at error
    pub fn log_level(&self) -> Level {
        if self.is_business() {
            Level::INFO
        } else {
            Level::ERROR
        }
    }
}

/// Log a failed call at [`ServiceError::log_level`]
pub(crate) fn log_failure(context: fmt::Arguments<'_>, err: &ServiceError) {
    if err.log_level() == Level::INFO {
        info!("{} rejected: {}", context, err);
    } else {
        error!("{} failed: {}", context, err);
    }
}

impl From<CoordinationError> for ServiceError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::NoNode(path) => ServiceError::NodeNotFound(path),
            CoordinationError::NodeExists(path) => ServiceError::NodeAlreadyExists(path),
            CoordinationError::BadVersion { path, expected, .. } => {
                ServiceError::VersionConflict { path, expected }
            }
            CoordinationError::NotEmpty(path) => ServiceError::NotEmpty(path),
            CoordinationError::InvalidPath(path) => {
                ServiceError::InvalidArgument(format!("invalid path {}", path))
            }
            CoordinationError::InvalidSpec(reason) => ServiceError::InvalidArgument(reason),
            other => ServiceError::Connectivity(other.to_string()),
        }
    }
}

impl From<PoolError> for ServiceError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ConnectFailed {
                key,
                attempts,
                source,
            } => ServiceError::ConnectFailed {
                key: key.to_string(),
                attempts,
                source,
            },
            PoolError::UnknownHandle(key) => ServiceError::UnknownHandle(key.to_string()),
            PoolError::ClientNotFound(key) => ServiceError::ClientNotFound(key.to_string()),
            PoolError::Coordination(err) => err.into(),
        }
    }
}
