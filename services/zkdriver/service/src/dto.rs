//! Data transfer objects handed to callers

use serde::{Deserialize, Serialize};
use zkdriver_client::{NodeData, NodeStat};

/// Child listing entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDto {
    /// Absolute path of the child
    pub path: String,
    /// Last path segment
    pub name: String,
}

/// Node payload decoded as text, with its version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDto {
    /// Payload as UTF-8 text; invalid sequences become U+FFFD
    pub data: String,
    /// Version to pass to the next conditional write
    pub version: i32,
    /// Full stat metadata
    pub stat: NodeStat,
}

impl From<NodeData> for DataDto {
    fn from(node: NodeData) -> Self {
        Self {
            data: String::from_utf8_lossy(&node.payload).into_owned(),
            version: node.stat.version,
            stat: node.stat,
        }
    }
}
