//! Keyed, reference-counted session pool
//!
//! Every [`ConnectionSpec`] maps to a [`SessionKey`]; all specs with the same
//! key share one underlying session. The slot map is the only shared mutable
//! state and is guarded by a single mutex. Establishment and close run with
//! the mutex released.

use crate::retry::connect_with_retry;
use crate::PoolError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use zkdriver_client::{ConnectionSpec, Connector, CoordinationSession, SessionKey};

type SessionCell = Arc<OnceCell<Arc<dyn CoordinationSession>>>;
type SlotMap = Arc<Mutex<HashMap<SessionKey, Slot>>>;

/// Handle to a pooled session; carries only the key
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SessionHandle {
    key: SessionKey,
}

impl SessionHandle {
    /// Key of the pooled session
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

struct Slot {
    /// Set once the session is established
    cell: SessionCell,
    ref_count: usize,
}

/// Pool of shared coordination sessions
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    slots: SlotMap,
}

impl SessionPool {
    /// Create an empty pool establishing sessions through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take a reference on the session for `spec`, establishing it on first use.
    ///
    /// Concurrent acquirers of one key wait on a single establishment. A
    /// failed or cancelled establishment gives the caller's reference back.
    /// If the slot leaves the pool while establishing (shutdown), the new
    /// session is closed and `ClientNotFound` is returned.
    pub async fn acquire(&self, spec: &ConnectionSpec) -> Result<SessionHandle, PoolError> {
        let key = spec.session_key();

        let cell = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                ref_count: 0,
            });
            slot.ref_count += 1;
            debug!("Acquire key={} ref_count={}", key, slot.ref_count);
            slot.cell.clone()
        };
        let mut pending = PendingAcquire {
            slots: self.slots.clone(),
            key: key.clone(),
            cell: cell.clone(),
            armed: true,
        };

        let established = cell
            .get_or_try_init(|| connect_with_retry(self.connector.as_ref(), spec))
            .await
            .cloned();

        let mut slots = self.slots.lock().await;
        pending.disarm();
        let attached = slots
            .get(&key)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, &cell));

        match established {
            Ok(_) if attached => {
                drop(slots);
                info!("Session acquired key={}", key);
                Ok(SessionHandle { key })
            }
            Ok(session) => {
                drop(slots);
                warn!("Session key={} left the pool while establishing", key);
                close_session(&key, session).await;
                Err(PoolError::ClientNotFound(key))
            }
            Err(err) => {
                let retired = retire(&mut slots, &key, &cell);
                drop(slots);
                if let Some(session) = retired {
                    close_session(&key, session).await;
                }
                Err(err)
            }
        }
    }

    /// Drop a reference; the last one closes the session.
    ///
    /// Only established sessions can be released. Close failures are logged
    /// and swallowed.
    pub async fn release(&self, handle: &SessionHandle) -> Result<(), PoolError> {
        let retired = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .get_mut(&handle.key)
                .filter(|slot| slot.cell.initialized())
                .ok_or_else(|| PoolError::UnknownHandle(handle.key.clone()))?;

            slot.ref_count -= 1;
            if slot.ref_count > 0 {
                debug!("Release key={} ref_count={}", handle.key, slot.ref_count);
                return Ok(());
            }
            slots
                .remove(&handle.key)
                .and_then(|slot| slot.cell.get().cloned())
        };

        if let Some(session) = retired {
            close_session(&handle.key, session).await;
        }
        Ok(())
    }

    /// Live session for `key`; does not touch the reference count
    pub async fn lookup(&self, key: &SessionKey) -> Result<Arc<dyn CoordinationSession>, PoolError> {
        let slots = self.slots.lock().await;
        slots
            .get(key)
            .and_then(|slot| slot.cell.get().cloned())
            .ok_or_else(|| PoolError::ClientNotFound(key.clone()))
    }

    /// Current reference count for `key`, if pooled
    pub async fn ref_count(&self, key: &SessionKey) -> Option<usize> {
        self.slots.lock().await.get(key).map(|slot| slot.ref_count)
    }

    /// Number of pooled keys
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Whether the pool holds no sessions
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Close every pooled session regardless of outstanding references
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionKey, Slot)> = self.slots.lock().await.drain().collect();
        info!("Shutting down session pool ({} sessions)", drained.len());

        for (key, slot) in drained {
            if slot.ref_count > 0 {
                debug!("Closing key={} with {} live references", key, slot.ref_count);
            }
            if let Some(session) = slot.cell.get().cloned() {
                close_session(&key, session).await;
            }
        }
    }
}

/// Drop one reference from the slot owning `cell`; the last one removes the
/// slot and yields its session for closing.
fn retire(
    slots: &mut HashMap<SessionKey, Slot>,
    key: &SessionKey,
    cell: &SessionCell,
) -> Option<Arc<dyn CoordinationSession>> {
    let last = match slots.get_mut(key) {
        Some(slot) if Arc::ptr_eq(&slot.cell, cell) => {
            slot.ref_count -= 1;
            slot.ref_count == 0
        }
        _ => false,
    };
    if last {
        slots.remove(key).and_then(|slot| slot.cell.get().cloned())
    } else {
        None
    }
}

/// Reference taken by an `acquire` that has not yet handed out a handle.
///
/// Dropping it armed (the acquire future was cancelled) returns the reference.
struct PendingAcquire {
    slots: SlotMap,
    key: SessionKey,
    cell: SessionCell,
    armed: bool,
}

impl PendingAcquire {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Acquire abandoned key={}", self.key);

        let key = self.key.clone();
        let cell = self.cell.clone();
        if let Ok(mut slots) = self.slots.try_lock() {
            let retired = retire(&mut slots, &key, &cell);
            drop(slots);
            if let Some(session) = retired {
                spawn_on_current(&self.key, async move { close_session(&key, session).await });
            }
            return;
        }

        let slots = self.slots.clone();
        spawn_on_current(&self.key, async move {
            let retired = retire(&mut *slots.lock().await, &key, &cell);
            if let Some(session) = retired {
                close_session(&key, session).await;
            }
        });
    }
}

fn spawn_on_current<F>(key: &SessionKey, task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(task);
        }
        Err(_) => warn!("No runtime to finish abandoned acquire key={}", key),
    }
}

async fn close_session(key: &SessionKey, session: Arc<dyn CoordinationSession>) {
    match session.close().await {
        Ok(()) => info!("Session closed key={}", key),
        Err(err) => warn!("Failed to close session key={}: {}", key, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::time::Duration;
    use zkdriver_client::backend::mem::{MemoryConnector, MemoryEnsemble};
    use zkdriver_client::RetryPolicy;

    fn spec(addresses: &[&str]) -> ConnectionSpec {
        ConnectionSpec::new(
            addresses.iter().copied(),
            RetryPolicy::new(Duration::from_millis(50), 2),
            Duration::from_secs(15),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn pool() -> (Arc<MemoryConnector>, SessionPool) {
        let connector = Arc::new(MemoryConnector::new(MemoryEnsemble::new()));
        let pool = SessionPool::new(connector.clone());
        (connector, pool)
    }

    #[tokio::test]
    async fn test_equal_keys_share_session() {
        let (connector, pool) = pool();

        let a = pool.acquire(&spec(&["zk1:2181", "zk2:2181"])).await.unwrap();
        let b = pool.acquire(&spec(&["zk2:2181", "zk1"])).await.unwrap();

        assert_eq!(a.key(), b.key());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(pool.ref_count(a.key()).await, Some(2));
        assert_eq!(pool.len().await, 1);

        let first = pool.lookup(a.key()).await.unwrap();
        let second = pool.lookup(b.key()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_sessions() {
        let (connector, pool) = pool();

        let a = pool.acquire(&spec(&["zk1:2181"])).await.unwrap();
        let b = pool.acquire(&spec(&["zk3:2181"])).await.unwrap();

        assert_ne!(a.key(), b.key());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_release_is_inverse_of_acquire() {
        let (connector, pool) = pool();
        let spec = spec(&["zk1:2181"]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(pool.acquire(&spec).await.unwrap());
        }
        assert_eq!(pool.ref_count(&spec.session_key()).await, Some(4));

        for (released, handle) in handles.iter().enumerate() {
            pool.release(handle).await.unwrap();
            if released < 3 {
                assert_eq!(connector.close_count(), 0);
                assert!(pool.lookup(handle.key()).await.is_ok());
            }
        }

        assert!(pool.is_empty().await);
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_double_release_fails() {
        let (_connector, pool) = pool();
        let handle = pool.acquire(&spec(&["zk1:2181"])).await.unwrap();

        pool.release(&handle).await.unwrap();
        let err = pool.release(&handle).await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownHandle(key) if key == *handle.key()));
    }

    #[tokio::test]
    async fn test_lookup_unknown_key() {
        let (_connector, pool) = pool();
        let err = pool.lookup(&SessionKey::from("nope")).await.err().unwrap();
        assert!(matches!(err, PoolError::ClientNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_connects_once() {
        let connector = Arc::new(
            MemoryConnector::new(MemoryEnsemble::new())
                .with_connect_delay(Duration::from_millis(20)),
        );
        let pool = SessionPool::new(connector.clone());
        let spec = spec(&["zk1:2181"]);

        let handles = join_all((0..8).map(|_| pool.acquire(&spec))).await;
        assert!(handles.iter().all(|handle| handle.is_ok()));
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(pool.ref_count(&spec.session_key()).await, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_acquire_leaves_no_slot() {
        let (connector, pool) = pool();
        connector.fail_next_connects(3);
        let spec = spec(&["zk1:2181"]);

        let err = pool.acquire(&spec).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectFailed { attempts: 3, .. }));
        assert!(pool.is_empty().await);

        let handle = pool.acquire(&spec).await.unwrap();
        assert_eq!(pool.ref_count(handle.key()).await, Some(1));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (connector, pool) = pool();
        pool.acquire(&spec(&["zk1:2181"])).await.unwrap();
        pool.acquire(&spec(&["zk2:2181"])).await.unwrap();
        pool.acquire(&spec(&["zk2:2181"])).await.unwrap();

        pool.shutdown().await;
        assert!(pool.is_empty().await);
        assert_eq!(connector.close_count(), 2);
    }

    fn delayed_pool(delay: Duration) -> (Arc<MemoryConnector>, SessionPool) {
        let connector =
            Arc::new(MemoryConnector::new(MemoryEnsemble::new()).with_connect_delay(delay));
        let pool = SessionPool::new(connector.clone());
        (connector, pool)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_returns_reference() {
        let (connector, pool) = delayed_pool(Duration::from_millis(200));
        let spec = spec(&["zk1:2181"]);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), pool.acquire(&spec)).await;
        assert!(cancelled.is_err());
        assert!(pool.is_empty().await);
        assert_eq!(pool.ref_count(&spec.session_key()).await, None);

        let handle = pool.acquire(&spec).await.unwrap();
        assert_eq!(pool.ref_count(handle.key()).await, Some(1));

        pool.release(&handle).await.unwrap();
        assert!(pool.is_empty().await);
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_while_establishing() {
        let (connector, pool) = delayed_pool(Duration::from_millis(50));
        let spec = spec(&["zk1:2181"]);

        let stale = pool.acquire(&spec).await.unwrap();
        pool.release(&stale).await.unwrap();

        let (fresh, stale_release) = tokio::join!(pool.acquire(&spec), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pool.release(&stale).await
        });

        assert!(matches!(stale_release, Err(PoolError::UnknownHandle(_))));
        let fresh = fresh.unwrap();
        assert!(pool.lookup(fresh.key()).await.is_ok());
        assert_eq!(pool.ref_count(fresh.key()).await, Some(1));

        pool.release(&fresh).await.unwrap();
        assert!(pool.is_empty().await);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.close_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_establishing() {
        let (connector, pool) = delayed_pool(Duration::from_millis(50));
        let spec = spec(&["zk1:2181"]);

        let (acquired, ()) = tokio::join!(pool.acquire(&spec), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pool.shutdown().await
        });

        assert!(matches!(acquired, Err(PoolError::ClientNotFound(_))));
        assert!(pool.is_empty().await);
        assert_eq!(connector.close_count(), 1);
    }
}
