use anyhow::Context;
use clap::Parser;
use conductor_core::ConfigLoader;
use conductor_engine::ExecutionEngine;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Runs the conductor graph-update consumer against the configured bus.
#[derive(Debug, Parser)]
#[command(name = "conductor", version, about)]
struct Args {
    /// Path to a TOML or JSON engine configuration file
    #[arg(short, long, env = "CONDUCTOR_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log filter, overrides `logging.level` from the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::load(args.config.as_deref()).context("failed to load configuration")?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let engine = ExecutionEngine::builder(config)
        .build()
        .context("failed to build execution engine")?;
    let consumer = engine.graph_consumer()?;

    let shutdown = engine.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        shutdown.cancel();
    });

    info!(topic = consumer.topic(), "Conductor running");
    let stats = consumer.run().await;
    info!(
        batches = stats.batches,
        messages = stats.messages,
        dropped = stats.dropped,
        "Conductor stopped"
    );
    Ok(())
}
