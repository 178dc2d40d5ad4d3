//! Pool error types.

use thiserror::Error;
use zkdriver_client::{CoordinationError, SessionKey};

/// Session pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Session establishment exhausted its retries
    #[error("failed to connect session {key} after {attempts} attempt(s): {source}")]
    ConnectFailed {
        /// Key of the slot being established
        key: SessionKey,
        /// Connect attempts made, first one included
        attempts: u32,
        /// Error of the last attempt
        source: CoordinationError,
    },

    /// Release of a key the pool does not hold
    #[error("unknown session handle: {0}")]
    UnknownHandle(SessionKey),

    /// No live session for the key
    #[error("client not found for key: {0}")]
    ClientNotFound(SessionKey),

    /// Error raised by an operation against a live session
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}
