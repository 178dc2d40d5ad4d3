//! Resolve catalog records into pooled sessions

use crate::catalog::ServerCatalog;
use crate::error::log_failure;
use crate::ServiceError;
use std::sync::Arc;
use tracing::info;
use zkdriver_pool::{SessionHandle, SessionPool};

/// Opens and closes pooled sessions by catalog id
#[derive(Clone)]
pub struct ClientService {
    catalog: Arc<dyn ServerCatalog>,
    pool: Arc<SessionPool>,
}

impl ClientService {
    /// Create a client service
    pub fn new(catalog: Arc<dyn ServerCatalog>, pool: Arc<SessionPool>) -> Self {
        Self { catalog, pool }
    }

    /// Acquire the pooled session for catalog record `server_info_id`
    pub async fn connect(&self, server_info_id: i64) -> Result<SessionHandle, ServiceError> {
        info!("Looking up server info id={}", server_info_id);
        let result = async {
            let info = self
                .catalog
                .server_info(server_info_id)
                .await?
                .ok_or(ServiceError::ServerNotFound(server_info_id))?;

            info!(
                "Connecting servers={} retry_sleep_time_ms={} retry_times={} conn_timeout_ms={} session_timeout_ms={}",
                info.servers,
                info.retry_sleep_time_ms,
                info.retry_times,
                info.conn_timeout_ms,
                info.session_timeout_ms
            );
            let spec = info.to_connection_spec()?;
            let handle = self.pool.acquire(&spec).await?;
            info!("Client ready id={} key={}", server_info_id, handle.key());
            Ok::<_, ServiceError>(handle)
        }
        .await;

        if let Err(err) = &result {
            log_failure(format_args!("Connect server info id={}", server_info_id), err);
        }
        result
    }

    /// Release a handle obtained from [`ClientService::connect`]
    pub async fn close(&self, handle: &SessionHandle) -> Result<(), ServiceError> {
        info!("Closing client key={}", handle.key());
        match self.pool.release(handle).await {
            Ok(()) => {
                info!("Client closed key={}", handle.key());
                Ok(())
            }
            Err(err) => {
                let err = ServiceError::from(err);
                log_failure(format_args!("Close client key={}", handle.key()), &err);
                Err(err)
            }
        }
    }
}
