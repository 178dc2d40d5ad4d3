//! In-memory coordination backend for development and testing

use crate::{
    child_path, parent_path, validate_path, ConnectionSpec, Connector, CoordinationError,
    CoordinationSession, NodeData, NodeStat,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Version value that matches any node version on a conditional write
pub const ANY_VERSION: i32 = -1;

#[derive(Debug)]
struct ZNode {
    data: Bytes,
    stat: NodeStat,
    /// Child names in creation order
    children: Vec<String>,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, ZNode>,
    /// Last assigned transaction id
    zxid: i64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            ZNode {
                data: Bytes::new(),
                stat: NodeStat::default(),
                children: Vec::new(),
            },
        );
        Self { nodes, zxid: 0 }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn collect_subtree(&self, path: &str, out: &mut Vec<String>) {
        if let Some(node) = self.nodes.get(path) {
            for name in &node.children {
                self.collect_subtree(&child_path(path, name), out);
            }
        }
        out.push(path.to_string());
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared in-process node tree standing in for an ensemble
#[derive(Clone, Debug)]
pub struct MemoryEnsemble {
    tree: Arc<RwLock<Tree>>,
    next_session_id: Arc<AtomicI64>,
}

impl MemoryEnsemble {
    /// Create an ensemble holding only the root node
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(Tree::new())),
            next_session_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Number of nodes, root included
    pub async fn node_count(&self) -> usize {
        self.tree.read().await.nodes.len()
    }

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        validate_path(path)?;
        Ok(self.tree.read().await.nodes.contains_key(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        validate_path(path)?;
        let tree = self.tree.read().await;
        tree.nodes
            .get(path)
            .map(|node| node.children.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn read(&self, path: &str) -> Result<NodeData, CoordinationError> {
        validate_path(path)?;
        let tree = self.tree.read().await;
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;

        let mut stat = node.stat.clone();
        stat.num_children = node.children.len() as i32;
        stat.data_length = node.data.len() as i32;
        Ok(NodeData {
            payload: node.data.clone(),
            stat,
        })
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        validate_path(path)?;
        let parent = match parent_path(path) {
            Some(parent) => parent,
            None => return Err(CoordinationError::NodeExists(path.to_string())),
        };

        let mut tree = self.tree.write().await;
        if tree.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        if !tree.nodes.contains_key(parent) {
            return Err(CoordinationError::NoNode(parent.to_string()));
        }

        let zxid = tree.next_zxid();
        let now = now_millis();
        let name = path[parent.len()..].trim_start_matches('/');
        if let Some(parent_node) = tree.nodes.get_mut(parent) {
            parent_node.children.push(name.to_string());
            parent_node.stat.cversion = parent_node.stat.cversion.wrapping_add(1);
        }
        tree.nodes.insert(
            path.to_string(),
            ZNode {
                data: Bytes::copy_from_slice(data),
                stat: NodeStat {
                    czxid: zxid,
                    mzxid: zxid,
                    ctime: now,
                    mtime: now,
                    version: 0,
                    cversion: 0,
                    num_children: 0,
                    data_length: data.len() as i32,
                },
                children: Vec::new(),
            },
        );

        debug!("memory create path={} len={} zxid={}", path, data.len(), zxid);
        Ok(())
    }

    async fn write(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<NodeStat, CoordinationError> {
        validate_path(path)?;
        let mut tree = self.tree.write().await;
        let current = match tree.nodes.get(path) {
            Some(node) => node.stat.version,
            None => return Err(CoordinationError::NoNode(path.to_string())),
        };
        if expected_version != ANY_VERSION && expected_version != current {
            return Err(CoordinationError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
                actual: Some(current),
            });
        }

        let zxid = tree.next_zxid();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = Bytes::copy_from_slice(data);
        node.stat.version = node.stat.version.wrapping_add(1);
        node.stat.mzxid = zxid;
        node.stat.mtime = now_millis();
        node.stat.data_length = data.len() as i32;
        node.stat.num_children = node.children.len() as i32;

        debug!(
            "memory write path={} version={} zxid={}",
            path, node.stat.version, zxid
        );
        Ok(node.stat.clone())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), CoordinationError> {
        validate_path(path)?;
        let parent = match parent_path(path) {
            Some(parent) => parent,
            None => return Err(CoordinationError::InvalidPath(path.to_string())),
        };

        let mut tree = self.tree.write().await;
        let has_children = match tree.nodes.get(path) {
            Some(node) => !node.children.is_empty(),
            None => return Err(CoordinationError::NoNode(path.to_string())),
        };
        if has_children && !recursive {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }

        let mut doomed = Vec::new();
        tree.collect_subtree(path, &mut doomed);
        for victim in &doomed {
            tree.nodes.remove(victim);
        }

        let name = path[parent.len()..].trim_start_matches('/').to_string();
        if let Some(parent_node) = tree.nodes.get_mut(parent) {
            parent_node.children.retain(|child| *child != name);
            parent_node.stat.cversion = parent_node.stat.cversion.wrapping_add(1);
        }
        tree.next_zxid();

        debug!("memory delete path={} removed={}", path, doomed.len());
        Ok(())
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector handing out sessions on a [`MemoryEnsemble`]
#[derive(Debug)]
pub struct MemoryConnector {
    ensemble: MemoryEnsemble,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fail_next: AtomicU32,
    connect_delay: Option<Duration>,
}

impl MemoryConnector {
    /// Create a connector over an ensemble
    pub fn new(ensemble: MemoryEnsemble) -> Self {
        Self {
            ensemble,
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_next: AtomicU32::new(0),
            connect_delay: None,
        }
    }

    /// Sleep this long inside every connect attempt
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Make the next `count` connect attempts fail with a connection loss
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Underlying ensemble
    pub fn ensemble(&self) -> &MemoryEnsemble {
        &self.ensemble
    }

    /// Number of sessions successfully established
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of sessions closed
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn CoordinationSession>, CoordinationError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CoordinationError::ConnectionLoss(format!(
                "unable to reach {}",
                spec.connect_string()
            )));
        }

        let session_id = self.ensemble.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!(
            "memory session {} established for {}",
            session_id,
            spec.connect_string()
        );

        Ok(Arc::new(MemorySession {
            session_id,
            ensemble: self.ensemble.clone(),
            closed: AtomicBool::new(false),
            closes: self.closes.clone(),
        }))
    }
}

/// Session on a [`MemoryEnsemble`]
#[derive(Debug)]
pub struct MemorySession {
    session_id: i64,
    ensemble: MemoryEnsemble,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

impl MemorySession {
    /// Session identifier assigned by the ensemble
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    fn ensure_open(&self) -> Result<(), CoordinationError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoordinationError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        self.ensure_open()?;
        self.ensemble.exists(path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.ensure_open()?;
        self.ensemble.children(path).await
    }

    async fn read(&self, path: &str) -> Result<NodeData, CoordinationError> {
        self.ensure_open()?;
        self.ensemble.read(path).await
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        self.ensure_open()?;
        self.ensemble.create(path, data).await
    }

    async fn write(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<NodeStat, CoordinationError> {
        self.ensure_open()?;
        self.ensemble.write(path, data, expected_version).await
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), CoordinationError> {
        self.ensure_open()?;
        self.ensemble.delete(path, recursive).await
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            debug!("memory session {} closed", self.session_id);
        }
        Ok(())
    }
}
