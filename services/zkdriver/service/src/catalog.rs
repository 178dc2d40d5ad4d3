//! Read-only catalog of ensemble configurations keyed by numeric id

use crate::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use zkdriver_client::{ConnectionSpec, CoordinationError, RetryPolicy};

fn default_retry_sleep_time_ms() -> u64 {
    1000
}

fn default_retry_times() -> u32 {
    3
}

fn default_conn_timeout_ms() -> u64 {
    15_000
}

fn default_session_timeout_ms() -> u64 {
    60_000
}

/// One ensemble configuration record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Record id
    pub id: i64,
    /// Human readable label
    #[serde(default)]
    pub name: Option<String>,
    /// Comma separated connect string
    pub servers: String,
    /// Base backoff between connect attempts
    #[serde(default = "default_retry_sleep_time_ms")]
    pub retry_sleep_time_ms: u64,
    /// Connect retries after the first attempt
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    /// Connect timeout
    #[serde(default = "default_conn_timeout_ms")]
    pub conn_timeout_ms: u64,
    /// Session timeout
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

impl ServerInfo {
    /// Connection parameters described by this record
    pub fn to_connection_spec(&self) -> Result<ConnectionSpec, CoordinationError> {
        ConnectionSpec::from_connect_string(
            &self.servers,
            RetryPolicy::new(
                Duration::from_millis(self.retry_sleep_time_ms),
                self.retry_times,
            ),
            Duration::from_millis(self.conn_timeout_ms),
            Duration::from_millis(self.session_timeout_ms),
        )
    }
}

/// Source of ensemble configuration records
#[async_trait]
pub trait ServerCatalog: Send + Sync {
    /// Record for `id`, if any
    async fn server_info(&self, id: i64) -> Result<Option<ServerInfo>, ServiceError>;

    /// All records, ordered by id
    async fn list(&self) -> Result<Vec<ServerInfo>, ServiceError>;
}

/// Catalog held in memory, typically loaded from configuration
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    servers: BTreeMap<i64, ServerInfo>,
}

impl StaticCatalog {
    /// Build a catalog; later records win on duplicate ids
    pub fn new<I: IntoIterator<Item = ServerInfo>>(servers: I) -> Self {
        Self {
            servers: servers.into_iter().map(|info| (info.id, info)).collect(),
        }
    }
}

#[async_trait]
impl ServerCatalog for StaticCatalog {
    async fn server_info(&self, id: i64) -> Result<Option<ServerInfo>, ServiceError> {
        Ok(self.servers.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ServerInfo>, ServiceError> {
        Ok(self.servers.values().cloned().collect())
    }
}
