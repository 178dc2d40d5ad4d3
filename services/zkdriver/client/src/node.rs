//! Node data, stat metadata and path helpers.

use crate::CoordinationError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Stat metadata stored alongside every node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStat {
    /// Transaction id that created the node
    pub czxid: i64,
    /// Transaction id of the last data change
    pub mzxid: i64,
    /// Creation time (epoch millis)
    pub ctime: i64,
    /// Last modification time (epoch millis)
    pub mtime: i64,
    /// Data version, the optimistic-concurrency token
    pub version: i32,
    /// Children version
    pub cversion: i32,
    /// Number of direct children
    pub num_children: i32,
    /// Payload length in bytes
    pub data_length: i32,
}

/// Payload and stat of a node as read from the ensemble
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeData {
    /// Raw payload
    pub payload: Bytes,
    /// Stat metadata at read time
    pub stat: NodeStat,
}

impl NodeData {
    /// Current data version
    pub fn version(&self) -> i32 {
        self.stat.version
    }
}

/// Validate an absolute node path.
pub fn validate_path(path: &str) -> Result<(), CoordinationError> {
    if !path.starts_with('/') {
        return Err(CoordinationError::InvalidPath(path.to_string()));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') || path.split('/').skip(1).any(|segment| segment.is_empty()) {
        return Err(CoordinationError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Parent of a validated path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Join a parent path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
