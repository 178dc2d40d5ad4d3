//! Keyed coordination session pool for zkdriver.
//!
//! This crate turns connection specs into shared, reference-counted session
//! handles and routes operations to the live session behind a key.
//!
//! ## Features
//!
//! - **Session sharing**: specs deriving the same key share one session
//! - **Reference counting**: the last release closes the session
//! - **Backoff**: establishment retries per the spec's retry policy
//! - **Invoker**: one chokepoint from operations to sessions
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zkdriver_client::backend::mem::{MemoryConnector, MemoryEnsemble};
//! use zkdriver_client::{ConnectionSpec, RetryPolicy};
//! use zkdriver_pool::{CoordinationInvoker, SessionPool};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = Arc::new(SessionPool::new(Arc::new(MemoryConnector::new(
//!     MemoryEnsemble::new(),
//! ))));
//! let spec = ConnectionSpec::from_connect_string(
//!     "zk1:2181,zk2:2181",
//!     RetryPolicy::new(Duration::from_millis(1000), 3),
//!     Duration::from_secs(15),
//!     Duration::from_secs(60),
//! )?;
//!
//! let handle = pool.acquire(&spec).await?;
//! let invoker = CoordinationInvoker::new(pool.clone());
//! let exists = invoker
//!     .invoke(handle.key(), |session| async move { session.exists("/app").await })
//!     .await?;
//! println!("/app exists: {}", exists);
//! pool.release(&handle).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod invoker;
pub mod pool;
pub mod retry;

// Re-export main types
pub use error::PoolError;
pub use invoker::CoordinationInvoker;
pub use pool::{SessionHandle, SessionPool};
pub use retry::connect_with_retry;
