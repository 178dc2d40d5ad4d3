//! Coordination backend implementations

pub mod mem;

#[cfg(feature = "zookeeper")]
pub mod zookeeper;
