//! zkdriver command line binary.
//!
//! Resolves a catalog record into a pooled coordination session and runs one
//! node operation against it, printing the result as JSON.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;
use zkdriver_client::connector_from_mode;
use zkdriver_pool::{CoordinationInvoker, SessionPool};
use zkdriver_service::{ClientService, NodeService, ServerCatalog, ServiceError, StaticCatalog};

#[macro_use]
mod logging;
mod config;

use config::DriverConfig;
use logging::ZkDriverLogFormatter;

/// Pooled ZooKeeper node operations
#[derive(Parser, Debug)]
#[command(name = "redb-zkdriver", version, about = "Pooled ZooKeeper node operations")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "zkdriver.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Catalog id of the ensemble to operate on
    #[arg(long, short = 's', default_value_t = 1)]
    server: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalog records
    Servers,
    /// Check whether a node exists
    Exists {
        /// Node path
        path: String,
    },
    /// List the children of a node
    Ls {
        /// Parent path
        path: String,
    },
    /// Read a node's data and version
    Get {
        /// Node path
        path: String,
    },
    /// Create a node
    Create {
        /// Node path
        path: String,
        /// Node data
        data: String,
    },
    /// Update a node, conditioned on the version just read
    Set {
        /// Node path
        path: String,
        /// New node data
        data: String,
    },
    /// Delete a node and its subtree
    Rm {
        /// Node path
        path: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Subscriber must be live before the config file is read
    let boot_level = startup_log_level(
        args.log_level.clone(),
        std::env::var("ZKDRIVER_LOG_LEVEL").ok(),
    );
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&boot_level)?)
        .with_writer(std::io::stderr)
        .event_format(ZkDriverLogFormatter::new("zkdriver".to_string()))
        .with_filter_reloading();
    let filter_handle = builder.reload_handle();
    builder.init();

    let config = DriverConfig::load_from_file(&args.config)?;
    if args.log_level.is_none() && config.log_level != boot_level {
        filter_handle.reload(log_filter(&config.log_level)?)?;
    }

    component_info!(
        "cli",
        "Starting zkdriver v{} backend={:?} servers={}",
        env!("CARGO_PKG_VERSION"),
        config.backend,
        config.servers.len()
    );

    let catalog = Arc::new(StaticCatalog::new(config.servers.clone()));
    if let Command::Servers = args.command {
        let servers = catalog.list().await?;
        println!("{}", serde_json::to_string_pretty(&servers)?);
        return Ok(());
    }

    let connector = connector_from_mode(config.backend.mode())?;
    let pool = Arc::new(SessionPool::new(connector));
    let clients = ClientService::new(catalog, pool.clone());
    let nodes = NodeService::new(CoordinationInvoker::new(pool.clone()));

    let handle = clients.connect(args.server).await?;
    let outcome = run(&nodes, handle.key().as_str(), args.command).await;

    if let Err(e) = clients.close(&handle).await {
        component_warn!("cli", "Failed to release session: {}", e);
    }
    pool.shutdown().await;

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            component_error!("cli", "Operation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Level used until the config file is loaded: CLI flag, then environment
fn startup_log_level(cli: Option<String>, env: Option<String>) -> String {
    cli.or(env).unwrap_or_else(|| "info".to_string())
}

fn log_filter(level: &str) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::new("warn")
        .add_directive(format!("redb_zkdriver={}", level).parse()?)
        .add_directive(format!("zkdriver_client={}", level).parse()?)
        .add_directive(format!("zkdriver_pool={}", level).parse()?)
        .add_directive(format!("zkdriver_service={}", level).parse()?))
}

async fn run(
    nodes: &NodeService,
    key: &str,
    command: Command,
) -> Result<serde_json::Value, ServiceError> {
    let value = match command {
        Command::Servers => json!([]),
        Command::Exists { path } => {
            let exists = nodes.exists(key, &path).await?;
            json!({ "path": path, "exists": exists })
        }
        Command::Ls { path } => {
            let children = nodes.list_children(key, &path).await?;
            json!(children)
        }
        Command::Get { path } => {
            let data = nodes.read_data(key, &path).await?;
            json!(data)
        }
        Command::Create { path, data } => {
            nodes.create_node(key, &path, &data).await?;
            json!({ "path": path, "created": true })
        }
        Command::Set { path, data } => {
            nodes.update_node(key, &path, &data).await?;
            json!({ "path": path, "updated": true })
        }
        Command::Rm { path } => {
            nodes.delete_node(key, &path).await?;
            json!({ "path": path, "deleted": true })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_log_level() {
        assert_eq!(startup_log_level(None, None), "info");
        assert_eq!(startup_log_level(None, Some("debug".to_string())), "debug");
        assert_eq!(
            startup_log_level(Some("trace".to_string()), Some("debug".to_string())),
            "trace"
        );
    }

    #[test]
    fn test_log_filter() {
        assert!(log_filter("debug").is_ok());
        assert!(log_filter("not a level!").is_err());
    }
}
