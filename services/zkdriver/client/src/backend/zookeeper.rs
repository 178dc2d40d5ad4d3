//! ZooKeeper backend over the `zookeeper-client` crate

use crate::{
    child_path, validate_path, ConnectionSpec, Connector, CoordinationError, CoordinationSession,
    NodeData, NodeStat,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use zookeeper_client as zk;

impl From<zk::Error> for CoordinationError {
    fn from(err: zk::Error) -> Self {
        match err {
            zk::Error::NoNode => CoordinationError::NoNode(String::new()),
            zk::Error::NodeExists => CoordinationError::NodeExists(String::new()),
            zk::Error::NotEmpty => CoordinationError::NotEmpty(String::new()),
            zk::Error::ConnectionLoss | zk::Error::Timeout => {
                CoordinationError::ConnectionLoss(err.to_string())
            }
            zk::Error::SessionExpired | zk::Error::ClientClosed => CoordinationError::SessionClosed,
            other => CoordinationError::Backend(other.to_string()),
        }
    }
}

/// Attach the path to errors the client reports without one
fn at_path(path: &str, expected: Option<i32>) -> impl Fn(zk::Error) -> CoordinationError + '_ {
    move |err| match err {
        zk::Error::BadVersion => CoordinationError::BadVersion {
            path: path.to_string(),
            expected: expected.unwrap_or(-1),
            actual: None,
        },
        other => match CoordinationError::from(other) {
            CoordinationError::NoNode(_) => CoordinationError::NoNode(path.to_string()),
            CoordinationError::NodeExists(_) => CoordinationError::NodeExists(path.to_string()),
            CoordinationError::NotEmpty(_) => CoordinationError::NotEmpty(path.to_string()),
            mapped => mapped,
        },
    }
}

fn to_stat(stat: &zk::Stat) -> NodeStat {
    NodeStat {
        czxid: stat.czxid,
        mzxid: stat.mzxid,
        ctime: stat.ctime,
        mtime: stat.mtime,
        version: stat.version,
        cversion: stat.cversion,
        num_children: stat.num_children,
        data_length: stat.data_length,
    }
}

/// Connector establishing real ZooKeeper sessions
#[derive(Debug, Default)]
pub struct ZooKeeperConnector;

impl ZooKeeperConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for ZooKeeperConnector {
    async fn connect(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn CoordinationSession>, CoordinationError> {
        let cluster = spec.connect_string();
        let mut connector = zk::Client::connector();
        connector
            .session_timeout(spec.session_timeout())
            .connection_timeout(spec.connect_timeout());
        let client = connector.connect(&cluster).await?;

        info!("ZooKeeper session established for {}", cluster);
        Ok(Arc::new(ZooKeeperSession {
            client: RwLock::new(Some(client)),
        }))
    }
}

/// Session on a ZooKeeper ensemble
pub struct ZooKeeperSession {
    client: RwLock<Option<zk::Client>>,
}

impl ZooKeeperSession {
    async fn client(&self) -> Result<zk::Client, CoordinationError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(CoordinationError::SessionClosed)
    }
}

#[async_trait]
impl CoordinationSession for ZooKeeperSession {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        validate_path(path)?;
        let client = self.client().await?;
        let stat = client.check_stat(path).await.map_err(at_path(path, None))?;
        Ok(stat.is_some())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        validate_path(path)?;
        let client = self.client().await?;
        client.list_children(path).await.map_err(at_path(path, None))
    }

    async fn read(&self, path: &str) -> Result<NodeData, CoordinationError> {
        validate_path(path)?;
        let client = self.client().await?;
        let (data, stat) = client.get_data(path).await.map_err(at_path(path, None))?;
        Ok(NodeData {
            payload: Bytes::from(data),
            stat: to_stat(&stat),
        })
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        validate_path(path)?;
        let client = self.client().await?;
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        client
            .create(path, data, &options)
            .await
            .map_err(at_path(path, None))?;
        Ok(())
    }

    async fn write(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<NodeStat, CoordinationError> {
        validate_path(path)?;
        let client = self.client().await?;
        let expected = (expected_version >= 0).then_some(expected_version);
        let stat = client
            .set_data(path, data, expected)
            .await
            .map_err(at_path(path, expected))?;
        Ok(to_stat(&stat))
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), CoordinationError> {
        validate_path(path)?;
        let client = self.client().await?;
        if !recursive {
            return client.delete(path, None).await.map_err(at_path(path, None));
        }

        // Breadth-first listing, then delete deepest nodes first
        let mut order = vec![path.to_string()];
        let mut cursor = 0;
        while cursor < order.len() {
            let parent = order[cursor].clone();
            let children = client
                .list_children(&parent)
                .await
                .map_err(at_path(&parent, None))?;
            for name in children {
                order.push(child_path(&parent, &name));
            }
            cursor += 1;
        }

        for victim in order.iter().rev() {
            match client.delete(victim, None).await {
                Ok(()) => {}
                // Raced with another deleter on a descendant
                Err(zk::Error::NoNode) if victim != path => {}
                Err(err) => return Err(at_path(victim, None)(err)),
            }
        }
        debug!("ZooKeeper recursive delete path={} removed={}", path, order.len());
        Ok(())
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        // Dropping the last client handle ends the session
        if self.client.write().await.take().is_some() {
            info!("ZooKeeper session closed");
        }
        Ok(())
    }
}
