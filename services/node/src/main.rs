//! Hive node entry point
//!
//! Runs one cluster process against an in-process coordination store and
//! message bus. Useful for local smoke runs of configuration and actor wiring.

mod actors;

use actors::{ChatMgr, Presence};
use anyhow::{Context, Result};
use clap::Parser;
use hive_actors::ActorRegistry;
use hive_config::ClusterConfig;
use hive_network::{ClusterNode, MemoryBus, MemoryStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEASE_REAP_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ClusterConfig::load(args.config.as_deref()).context("Failed to load cluster configuration")?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level), args.json_logs);

    let member = config.member();
    info!(
        service = %member.service,
        address = %member.address(),
        namespace = %config.namespace,
        "Starting Hive node"
    );

    let registry = Arc::new(ActorRegistry::new());
    registry.register_singleton(Presence::new(member.address()))?;
    if config.stub.roles.iter().any(|role| role == "ChatMgr") {
        registry.register_stub(ChatMgr::default())?;
    }

    let store = Arc::new(MemoryStore::new());
    let reaper = store.spawn_reaper(LEASE_REAP_INTERVAL);
    let bus = Arc::new(MemoryBus::new());

    let node = ClusterNode::new(config, store, bus, registry)?;
    node.start().await.context("Failed to start cluster node")?;
    info!(cluster_id = node.cluster_id(), worker_id = ?node.worker_id(), "Node running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutdown requested");

    node.shutdown().await;
    reaper.abort();
    info!("Node stopped");
    Ok(())
}
