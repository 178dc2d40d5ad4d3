//! Connection parameters and session key derivation.
//!
//! A [`ConnectionSpec`] describes how to reach an ensemble. Two specs that
//! name the same set of servers with the same timeouts derive the same
//! [`SessionKey`] and may therefore share one live session.

use crate::CoordinationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default ZooKeeper client port
pub const DEFAULT_CLIENT_PORT: u16 = 2181;

/// Upper bound on retries so the backoff shift cannot overflow
pub const MAX_RETRIES_LIMIT: u32 = 29;

/// Exponential backoff policy for session establishment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base sleep between attempts
    pub base_delay: Duration,
    /// Number of retries after the first attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Create a policy, capping retries at [`MAX_RETRIES_LIMIT`]
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries: max_retries.min(MAX_RETRIES_LIMIT),
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    /// Whether another attempt is allowed after `retry_count` retries
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Sleep before retry number `retry_count` (0-based).
    ///
    /// The base delay is multiplied by a random factor in
    /// `[1, 2^(retry_count + 1) - 1]`.
    pub fn delay_for<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let shift = retry_count.min(MAX_RETRIES_LIMIT) + 1;
        let upper = (1u32 << shift) - 1;
        let factor = rng.gen_range(1..=upper.max(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 3)
    }
}

/// Key identifying a live session slot in the pool
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        SessionKey(value.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        SessionKey(value)
    }
}

/// Parameters for establishing a session against an ensemble
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSpec {
    ensemble_addresses: Vec<String>,
    retry: RetryPolicy,
    connect_timeout: Duration,
    session_timeout: Duration,
}

impl ConnectionSpec {
    /// Build a spec from an address list.
    ///
    /// Addresses without a port get [`DEFAULT_CLIENT_PORT`].
    pub fn new<I, S>(
        addresses: I,
        retry: RetryPolicy,
        connect_timeout: Duration,
        session_timeout: Duration,
    ) -> Result<Self, CoordinationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ensemble_addresses = Vec::new();
        for address in addresses {
            ensemble_addresses.push(normalize_address(address.as_ref())?);
        }
        if ensemble_addresses.is_empty() {
            return Err(CoordinationError::InvalidSpec(
                "ensemble address list is empty".to_string(),
            ));
        }
        if connect_timeout.is_zero() {
            return Err(CoordinationError::InvalidSpec(
                "connect timeout must be positive".to_string(),
            ));
        }
        if session_timeout.is_zero() {
            return Err(CoordinationError::InvalidSpec(
                "session timeout must be positive".to_string(),
            ));
        }

        Ok(Self {
            ensemble_addresses,
            retry,
            connect_timeout,
            session_timeout,
        })
    }

    /// Build a spec from a comma separated connect string, e.g. `zk1:2181,zk2:2181`
    pub fn from_connect_string(
        connect_string: &str,
        retry: RetryPolicy,
        connect_timeout: Duration,
        session_timeout: Duration,
    ) -> Result<Self, CoordinationError> {
        Self::new(
            connect_string.split(',').filter(|part| !part.trim().is_empty()),
            retry,
            connect_timeout,
            session_timeout,
        )
    }

    /// Ensemble addresses in the order given
    pub fn ensemble_addresses(&self) -> &[String] {
        &self.ensemble_addresses
    }

    /// Comma separated connect string
    pub fn connect_string(&self) -> String {
        self.ensemble_addresses.join(",")
    }

    /// Establishment backoff policy
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Per-attempt connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Negotiated session timeout
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Derive the pool key for this spec.
    ///
    /// Address order and duplicates do not matter; retry parameters are not
    /// part of the key.
    pub fn session_key(&self) -> SessionKey {
        let mut servers = self.ensemble_addresses.clone();
        servers.sort();
        servers.dedup();
        SessionKey(format!(
            "{}#{}/{}",
            servers.join(","),
            self.connect_timeout.as_millis(),
            self.session_timeout.as_millis()
        ))
    }
}

fn normalize_address(address: &str) -> Result<String, CoordinationError> {
    let address = address.trim().to_ascii_lowercase();
    if address.is_empty() {
        return Err(CoordinationError::InvalidSpec(
            "blank ensemble address".to_string(),
        ));
    }

    match address.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(CoordinationError::InvalidSpec(format!(
                    "malformed address {}",
                    address
                )));
            }
            Ok(address)
        }
        None => Ok(format!("{}:{}", address, DEFAULT_CLIENT_PORT)),
    }
}
