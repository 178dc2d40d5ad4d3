//! Node operations over pooled sessions
//!
//! Every operation validates its arguments before touching a session, then
//! runs through the [`CoordinationInvoker`]. Updates are two-phase: the
//! current version is read, then the write is conditioned on it. A writer
//! slipping in between makes the update fail with a version conflict; the
//! conflict is reported, never retried.

use crate::dto::{DataDto, NodeDto};
use crate::error::log_failure;
use crate::ServiceError;
use tracing::info;
use zkdriver_client::{child_path, NodeData, SessionKey};
use zkdriver_pool::CoordinationInvoker;

/// Path-based read/write/delete against the coordination namespace
#[derive(Clone)]
pub struct NodeService {
    invoker: CoordinationInvoker,
}

impl NodeService {
    /// Create a node service over an invoker
    pub fn new(invoker: CoordinationInvoker) -> Self {
        Self { invoker }
    }

    /// Whether a node exists at `path`
    pub async fn exists(&self, key: &str, path: &str) -> Result<bool, ServiceError> {
        info!("Checking node existence key={} path={}", key, path);
        let result = async {
            let session_key = require_key(key)?;
            require_path(path)?;
            let found = self
                .invoker
                .invoke(&session_key, |session| async move { session.exists(path).await })
                .await?;
            Ok::<_, ServiceError>(found)
        }
        .await;
        report("exists", key, path, result)
    }

    /// Direct children of `parent_path`, in the order the ensemble returns them
    pub async fn list_children(
        &self,
        key: &str,
        parent_path: &str,
    ) -> Result<Vec<NodeDto>, ServiceError> {
        info!("Listing children key={} path={}", key, parent_path);
        let result = async {
            let session_key = require_key(key)?;
            require_path(parent_path)?;
            let names = self
                .invoker
                .invoke(&session_key, |session| async move {
                    session.children(parent_path).await
                })
                .await?;
            let nodes = names
                .into_iter()
                .map(|name| NodeDto {
                    path: child_path(parent_path, &name),
                    name,
                })
                .collect();
            Ok::<_, ServiceError>(nodes)
        }
        .await;
        report("list_children", key, parent_path, result)
    }

    /// Payload of `path` decoded as UTF-8, with its version
    pub async fn read_data(&self, key: &str, path: &str) -> Result<DataDto, ServiceError> {
        info!("Reading node data key={} path={}", key, path);
        let result = async {
            let session_key = require_key(key)?;
            require_path(path)?;
            let node = self.fetch(&session_key, path).await?;
            Ok::<_, ServiceError>(DataDto::from(node))
        }
        .await;
        report("read_data", key, path, result)
    }

    /// Create a node holding `data`; blank data is rejected
    pub async fn create_node(&self, key: &str, path: &str, data: &str) -> Result<(), ServiceError> {
        info!("Creating node key={} path={} data={}", key, path, data);
        let result = async {
            let session_key = require_key(key)?;
            require_path(path)?;
            require_data(data)?;
            self.invoker
                .invoke(&session_key, |session| async move {
                    session.create(path, data.as_bytes()).await
                })
                .await?;
            Ok::<_, ServiceError>(())
        }
        .await;
        report("create_node", key, path, result)
    }

    /// Replace the payload of `path`, conditioned on the version read just before
    pub async fn update_node(&self, key: &str, path: &str, data: &str) -> Result<(), ServiceError> {
        info!("Updating node key={} path={} data={}", key, path, data);
        let result = async {
            let session_key = require_key(key)?;
            require_path(path)?;
            require_data(data)?;

            let current = self.fetch(&session_key, path).await?;
            let expected = current.version();
            info!(
                "Updating node key={} path={} old_data={} old_version={}",
                key,
                path,
                String::from_utf8_lossy(&current.payload),
                expected
            );

            let stat = self
                .invoker
                .invoke(&session_key, |session| async move {
                    session.write(path, data.as_bytes(), expected).await
                })
                .await?;
            info!(
                "Updated node key={} path={} version={}",
                key, path, stat.version
            );
            Ok::<_, ServiceError>(())
        }
        .await;
        report("update_node", key, path, result)
    }

    /// Delete `path` and its subtree.
    ///
    /// The preceding read only records what is being removed; the delete
    /// itself is unconditional.
    pub async fn delete_node(&self, key: &str, path: &str) -> Result<(), ServiceError> {
        info!("Deleting node key={} path={}", key, path);
        let result = async {
            let session_key = require_key(key)?;
            require_path(path)?;

            let old = self.fetch(&session_key, path).await?;
            info!(
                "Deleting node key={} path={} old_data={} old_version={} children={}",
                key,
                path,
                String::from_utf8_lossy(&old.payload),
                old.version(),
                old.stat.num_children
            );

            self.invoker
                .invoke(&session_key, |session| async move {
                    session.delete(path, true).await
                })
                .await?;
            Ok::<_, ServiceError>(())
        }
        .await;
        report("delete_node", key, path, result)
    }

    async fn fetch(&self, key: &SessionKey, path: &str) -> Result<NodeData, ServiceError> {
        let node = self
            .invoker
            .invoke(key, |session| async move { session.read(path).await })
            .await?;
        Ok(node)
    }
}

fn require_key(key: &str) -> Result<SessionKey, ServiceError> {
    if key.trim().is_empty() {
        return Err(ServiceError::InvalidArgument("client key is empty".to_string()));
    }
    Ok(SessionKey::from(key))
}

fn require_path(path: &str) -> Result<(), ServiceError> {
    if path.trim().is_empty() {
        return Err(ServiceError::InvalidArgument("path is empty".to_string()));
    }
    Ok(())
}

fn require_data(data: &str) -> Result<(), ServiceError> {
    if data.trim().is_empty() {
        return Err(ServiceError::InvalidArgument("node data is empty".to_string()));
    }
    Ok(())
}

/// Business outcomes are traced at info; everything else is logged as a failure.
fn report<T>(
    operation: &'static str,
    key: &str,
    path: &str,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    if let Err(err) = &result {
        log_failure(format_args!("{} key={} path={}", operation, key, path), err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use zkdriver_client::backend::mem::{MemoryConnector, MemoryEnsemble, ANY_VERSION};
    use zkdriver_client::{
        ConnectionSpec, Connector, CoordinationError, CoordinationSession, NodeStat, RetryPolicy,
    };
    use zkdriver_pool::{SessionHandle, SessionPool};

    /// Session wrapper counting calls and optionally racing a writer into `write`
    struct ProbeSession {
        inner: Arc<dyn CoordinationSession>,
        calls: Arc<AtomicUsize>,
        race_writes: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CoordinationSession for ProbeSession {
        async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.exists(path).await
        }

        async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.children(path).await
        }

        async fn read(&self, path: &str) -> Result<NodeData, CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.read(path).await
        }

        async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.create(path, data).await
        }

        async fn write(
            &self,
            path: &str,
            data: &[u8],
            expected_version: i32,
        ) -> Result<NodeStat, CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.race_writes.swap(false, Ordering::SeqCst) {
                self.inner.write(path, b"concurrent", ANY_VERSION).await?;
            }
            self.inner.write(path, data, expected_version).await
        }

        async fn delete(&self, path: &str, recursive: bool) -> Result<(), CoordinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(path, recursive).await
        }

        async fn close(&self) -> Result<(), CoordinationError> {
            self.inner.close().await
        }
    }

    struct ProbeConnector {
        inner: MemoryConnector,
        calls: Arc<AtomicUsize>,
        race_writes: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for ProbeConnector {
        async fn connect(
            &self,
            spec: &ConnectionSpec,
        ) -> Result<Arc<dyn CoordinationSession>, CoordinationError> {
            let inner = self.inner.connect(spec).await?;
            Ok(Arc::new(ProbeSession {
                inner,
                calls: self.calls.clone(),
                race_writes: self.race_writes.clone(),
            }))
        }
    }

    struct Fixture {
        service: NodeService,
        handle: SessionHandle,
        pool: Arc<SessionPool>,
        calls: Arc<AtomicUsize>,
        race_writes: Arc<AtomicBool>,
    }

    impl Fixture {
        fn key(&self) -> &str {
            self.handle.key().as_str()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    async fn fixture() -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let race_writes = Arc::new(AtomicBool::new(false));
        let connector = Arc::new(ProbeConnector {
            inner: MemoryConnector::new(MemoryEnsemble::new()),
            calls: calls.clone(),
            race_writes: race_writes.clone(),
        });
        let pool = Arc::new(SessionPool::new(connector));
        let spec = ConnectionSpec::from_connect_string(
            "zk1:2181,zk2:2181",
            RetryPolicy::no_retry(),
            Duration::from_secs(15),
            Duration::from_secs(60),
        )
        .unwrap();
        let handle = pool.acquire(&spec).await.unwrap();
        let service = NodeService::new(CoordinationInvoker::new(pool.clone()));

        Fixture {
            service,
            handle,
            pool,
            calls,
            race_writes,
        }
    }

    #[tokio::test]
    async fn test_create_read_update_round_trip() {
        let fx = fixture().await;

        fx.service.create_node(fx.key(), "/app", "x").await.unwrap();
        let data = fx.service.read_data(fx.key(), "/app").await.unwrap();
        assert_eq!(data.data, "x");
        assert_eq!(data.version, 0);

        fx.service.update_node(fx.key(), "/app", "y").await.unwrap();
        let data = fx.service.read_data(fx.key(), "/app").await.unwrap();
        assert_eq!(data.data, "y");
        assert_eq!(data.version, 1);
        assert_eq!(data.stat.data_length, 1);
    }

    #[tokio::test]
    async fn test_update_detects_concurrent_writer() {
        let fx = fixture().await;
        fx.service.create_node(fx.key(), "/cfg", "v0").await.unwrap();

        fx.race_writes.store(true, Ordering::SeqCst);
        let err = fx
            .service
            .update_node(fx.key(), "/cfg", "mine")
            .await
            .unwrap_err();
        assert!(
            matches!(err, ServiceError::VersionConflict { ref path, expected: 0 } if path == "/cfg")
        );

        let data = fx.service.read_data(fx.key(), "/cfg").await.unwrap();
        assert_eq!(data.data, "concurrent");
        assert_eq!(data.version, 1);
    }

    #[tokio::test]
    async fn test_create_blank_data_makes_no_session_call() {
        let fx = fixture().await;

        for data in ["", "   "] {
            let err = fx.service.create_node(fx.key(), "/app", data).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidArgument(_)));
            let err = fx.service.update_node(fx.key(), "/app", data).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidArgument(_)));
        }
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_rejected_everywhere() {
        let fx = fixture().await;
        fx.service.create_node(fx.key(), "/app", "x").await.unwrap();
        let before = fx.calls();

        for key in ["", " "] {
            let results = vec![
                fx.service.exists(key, "/app").await.err(),
                fx.service.list_children(key, "/app").await.err(),
                fx.service.read_data(key, "/app").await.err(),
                fx.service.create_node(key, "/other", "x").await.err(),
                fx.service.update_node(key, "/app", "y").await.err(),
                fx.service.delete_node(key, "/app").await.err(),
            ];
            for err in results {
                assert!(matches!(err, Some(ServiceError::InvalidArgument(_))));
            }
        }
        assert_eq!(fx.calls(), before);
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let fx = fixture().await;
        let err = fx.service.exists(fx.key(), "").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        assert_eq!(fx.calls(), 0);
    }

    #[tokio::test]
    async fn test_list_children() {
        let fx = fixture().await;
        fx.service.create_node(fx.key(), "/svc", "root").await.unwrap();

        let empty = fx.service.list_children(fx.key(), "/svc").await.unwrap();
        assert!(empty.is_empty());

        fx.service.create_node(fx.key(), "/svc/b", "1").await.unwrap();
        fx.service.create_node(fx.key(), "/svc/a", "2").await.unwrap();
        let children = fx.service.list_children(fx.key(), "/svc").await.unwrap();
        assert_eq!(
            children,
            vec![
                NodeDto {
                    path: "/svc/b".to_string(),
                    name: "b".to_string()
                },
                NodeDto {
                    path: "/svc/a".to_string(),
                    name: "a".to_string()
                },
            ]
        );

        let root = fx.service.list_children(fx.key(), "/").await.unwrap();
        assert_eq!(root[0].path, "/svc");

        let err = fx
            .service
            .list_children(fx.key(), "/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_node() {
        let fx = fixture().await;

        let err = fx.service.delete_node(fx.key(), "/ghost").await.unwrap_err();
        assert!(matches!(err, ServiceError::NodeNotFound(ref path) if path == "/ghost"));

        fx.service.create_node(fx.key(), "/tree", "t").await.unwrap();
        fx.service.create_node(fx.key(), "/tree/leaf", "l").await.unwrap();
        fx.service.create_node(fx.key(), "/tree/leaf/deep", "d").await.unwrap();

        fx.service.delete_node(fx.key(), "/tree").await.unwrap();
        assert!(!fx.service.exists(fx.key(), "/tree").await.unwrap());
        assert!(!fx.service.exists(fx.key(), "/tree/leaf/deep").await.unwrap());
    }

    #[tokio::test]
    async fn test_business_errors() {
        let fx = fixture().await;

        let err = fx.service.read_data(fx.key(), "/none").await.unwrap_err();
        assert!(matches!(err, ServiceError::NodeNotFound(_)));

        let err = fx.service.update_node(fx.key(), "/none", "x").await.unwrap_err();
        assert!(matches!(err, ServiceError::NodeNotFound(_)));

        fx.service.create_node(fx.key(), "/dup", "x").await.unwrap();
        let err = fx.service.create_node(fx.key(), "/dup", "x").await.unwrap_err();
        assert!(matches!(err, ServiceError::NodeAlreadyExists(ref path) if path == "/dup"));

        let err = fx.service.exists(fx.key(), "relative").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_stale_key_after_release() {
        let fx = fixture().await;
        fx.pool.release(&fx.handle).await.unwrap();

        let err = fx.service.exists(fx.key(), "/").await.unwrap_err();
        assert!(matches!(err, ServiceError::ClientNotFound(_)));
        assert!(!err.is_business());
    }
}
