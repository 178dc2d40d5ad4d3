//! Session establishment with exponential backoff

use crate::PoolError;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zkdriver_client::{ConnectionSpec, Connector, CoordinationSession};

/// Connect using the spec's retry policy.
///
/// Only connectivity faults are retried; anything else fails immediately.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    spec: &ConnectionSpec,
) -> Result<Arc<dyn CoordinationSession>, PoolError> {
    let policy = spec.retry();
    let mut retry_count = 0u32;

    loop {
        debug!(
            "Connecting to {} (attempt {}/{})",
            spec.connect_string(),
            retry_count + 1,
            policy.max_retries + 1
        );

        match connector.connect(spec).await {
            Ok(session) => {
                if retry_count > 0 {
                    info!(
                        "Connected to {} after {} retries",
                        spec.connect_string(),
                        retry_count
                    );
                }
                return Ok(session);
            }
            Err(err) if err.is_connectivity() && policy.allows_retry(retry_count) => {
                let delay = policy.delay_for(retry_count, &mut rand::thread_rng());
                warn!(
                    "Connect to {} failed: {}; retrying in {:?}",
                    spec.connect_string(),
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(err) => {
                return Err(PoolError::ConnectFailed {
                    key: spec.session_key(),
                    attempts: retry_count + 1,
                    source: err,
                });
            }
        }
    }
}
