//! Single entry point from node operations to pooled sessions

use crate::{PoolError, SessionPool};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use zkdriver_client::{CoordinationError, CoordinationSession, SessionKey};

/// Runs operations against the live session behind a key
#[derive(Clone)]
pub struct CoordinationInvoker {
    pool: Arc<SessionPool>,
}

impl CoordinationInvoker {
    /// Create an invoker over a pool
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    /// Pool this invoker resolves keys against
    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Run `op` against the session for `key`.
    ///
    /// A missing session fails with [`PoolError::ClientNotFound`]; errors
    /// from `op` come back unchanged as [`PoolError::Coordination`].
    pub async fn invoke<T, F, Fut>(&self, key: &SessionKey, op: F) -> Result<T, PoolError>
    where
        F: FnOnce(Arc<dyn CoordinationSession>) -> Fut,
        Fut: Future<Output = Result<T, CoordinationError>>,
    {
        let session = self.pool.lookup(key).await?;
        debug!("Invoking operation on key={}", key);
        op(session).await.map_err(PoolError::from)
    }
}
