//! Coordination client boundary for zkdriver: connection specs, session keys and backends.
//!
//! This crate defines what the rest of the driver needs from a coordination
//! client (a ZooKeeper-style tree of versioned nodes), plus pluggable
//! backends (in-memory, ZooKeeper).
//!
//! ## Example
//!
//! ```rust,no_run
//! use zkdriver_client::backend::mem::{MemoryConnector, MemoryEnsemble};
//! use zkdriver_client::{ConnectionSpec, Connector, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), zkdriver_client::CoordinationError> {
//! let connector = MemoryConnector::new(MemoryEnsemble::new());
//! let spec = ConnectionSpec::from_connect_string(
//!     "127.0.0.1:2181",
//!     RetryPolicy::default(),
//!     Duration::from_secs(15),
//!     Duration::from_secs(60),
//! )?;
//!
//! let session = connector.connect(&spec).await?;
//! session.create("/app", b"config").await?;
//! let data = session.read("/app").await?;
//! session.write("/app", b"config-v2", data.version()).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod connect;
pub mod error;
pub mod node;

use async_trait::async_trait;
use std::sync::Arc;

pub use connect::{ConnectionSpec, RetryPolicy, SessionKey, DEFAULT_CLIENT_PORT, MAX_RETRIES_LIMIT};
pub use error::CoordinationError;
pub use node::{child_path, parent_path, validate_path, NodeData, NodeStat};

/// A live session against a coordination ensemble.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    /// Whether a node exists at `path`
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Names of the direct children of `path`, in the order the ensemble returns them
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    /// Payload and stat of `path`
    async fn read(&self, path: &str) -> Result<NodeData, CoordinationError>;

    /// Create a persistent node; the parent must exist
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError>;

    /// Replace the payload if the node is still at `expected_version`
    async fn write(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<NodeStat, CoordinationError>;

    /// Delete `path`, and its subtree when `recursive` is set
    async fn delete(&self, path: &str, recursive: bool) -> Result<(), CoordinationError>;

    /// Close the session; closing twice is a no-op
    async fn close(&self) -> Result<(), CoordinationError>;
}

/// Establishes sessions from connection specs
#[async_trait]
pub trait Connector: Send + Sync {
    /// Make one establishment attempt, honouring the spec's timeouts
    async fn connect(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn CoordinationSession>, CoordinationError>;
}

/// Coordination backend selection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendMode {
    /// In-process ensemble (dev/tests only)
    #[default]
    InMemory,
    /// Real ZooKeeper ensemble
    ZooKeeper,
}

/// Create a connector for the given backend
pub fn connector_from_mode(mode: BackendMode) -> Result<Arc<dyn Connector>, CoordinationError> {
    match mode {
        BackendMode::InMemory => Ok(Arc::new(backend::mem::MemoryConnector::new(
            backend::mem::MemoryEnsemble::new(),
        ))),
        #[cfg(feature = "zookeeper")]
        BackendMode::ZooKeeper => Ok(Arc::new(backend::zookeeper::ZooKeeperConnector::new())),
        #[cfg(not(feature = "zookeeper"))]
        BackendMode::ZooKeeper => Err(CoordinationError::Backend(
            "built without the zookeeper feature".to_string(),
        )),
    }
}
