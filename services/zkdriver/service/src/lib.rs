//! Node and client services for zkdriver.
//!
//! [`NodeService`] exposes exists/list/read/create/update/delete against the
//! coordination namespace through pooled sessions; [`ClientService`] turns
//! catalog records into pooled session handles. Failures come back as
//! [`ServiceError`], whose variants separate expected business outcomes
//! (missing node, version conflict, ...) from connectivity faults.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod client_service;
pub mod dto;
pub mod error;
pub mod node_service;

// Re-export main types
pub use catalog::{ServerCatalog, ServerInfo, StaticCatalog};
pub use client_service::ClientService;
pub use dto::{DataDto, NodeDto};
pub use error::ServiceError;
pub use node_service::NodeService;
