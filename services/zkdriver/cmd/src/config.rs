//! Configuration handling for the zkdriver binary.
//!
//! This module reads the driver configuration (backend selection, log level
//! and the catalog of ensemble records) from a YAML file and environment
//! variables.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use zkdriver_client::BackendMode;
use zkdriver_service::ServerInfo;

/// Coordination backend named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process ensemble (dev/tests only)
    #[default]
    Memory,
    /// Real ZooKeeper ensemble
    Zookeeper,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(Backend::Memory),
            "zookeeper" => Some(Backend::Zookeeper),
            _ => None,
        }
    }

    /// Backend mode understood by the client crate
    pub fn mode(self) -> BackendMode {
        match self {
            Backend::Memory => BackendMode::InMemory,
            Backend::Zookeeper => BackendMode::ZooKeeper,
        }
    }
}

/// zkdriver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Coordination backend
    pub backend: Backend,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Catalog of ensemble records
    pub servers: Vec<ServerInfo>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            log_level: "info".to_string(),
            servers: Vec::new(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<DriverConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}, using defaults",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!(
                    "Config file {:?} not found, using defaults",
                    config_path.as_ref()
                );
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final zkdriver configuration: backend={:?}, log_level={}, servers={}",
            config.backend,
            config.log_level,
            config.servers.len()
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(backend) = std::env::var("ZKDRIVER_BACKEND") {
            match Backend::parse(&backend) {
                Some(parsed) => {
                    self.backend = parsed;
                    info!("Backend overridden by environment: {:?}", parsed);
                }
                None => warn!("Ignoring unknown ZKDRIVER_BACKEND value {}", backend),
            }
        }

        if let Ok(log_level) = std::env::var("ZKDRIVER_LOG_LEVEL") {
            self.log_level = log_level;
            info!("Log level overridden by environment: {}", self.log_level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.log_level, "info");
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
backend: memory
log_level: debug
servers:
  - id: 1
    name: primary
    servers: zk1:2181,zk2:2181
    retry_sleep_time_ms: 500
    retry_times: 5
  - id: 2
    servers: zk3
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = DriverConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name.as_deref(), Some("primary"));
        assert_eq!(config.servers[0].retry_times, 5);
        assert_eq!(config.servers[1].session_timeout_ms, 60_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DriverConfig::load_from_file("/nonexistent/zkdriver.yaml").unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("ZooKeeper"), Some(Backend::Zookeeper));
        assert_eq!(Backend::parse("memory"), Some(Backend::Memory));
        assert_eq!(Backend::parse("etcd"), None);
        assert_eq!(Backend::Zookeeper.mode(), BackendMode::ZooKeeper);
    }
}
