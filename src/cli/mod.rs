//! Command-line interface for sluice.
//!
//! Provides commands for running a pipeline from configuration, listing the
//! registered plugins, and showing the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::PipelineConfig;
use crate::core::{
    assemble, metrics_from_config, OrchestratorSettings, PluginKind, PluginRegistry,
    PluginSelection,
};
use crate::metrics::MetricsRuntime;

/// sluice - bounded-concurrency data-movement engine
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pipeline config file (default: discovered .sluice/pipeline.yaml)
    #[arg(short, long, global = true, env = "SLUICE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured pipeline until Ctrl-C
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Seconds between metric reports
        #[arg(short, long, default_value = "10")]
        report_interval: u64,
    },

    /// List registered plugins
    Plugins,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                duration,
                report_interval,
            } => run_pipeline(self.config, duration, report_interval).await,
            Commands::Plugins => list_plugins(),
            Commands::Config => show_config(self.config),
        }
    }
}

/// Run the pipeline, reporting metrics until interrupted or timed out
async fn run_pipeline(
    config_path: Option<PathBuf>,
    duration: Option<u64>,
    report_interval: u64,
) -> Result<()> {
    let config = PipelineConfig::load(config_path.as_deref())?;
    let metrics = metrics_from_config(&config)?;
    let registry = PluginRegistry::with_builtins();

    let orchestrator = assemble(&config, &registry, Arc::clone(&metrics))
        .context("Failed to assemble pipeline")?;
    orchestrator
        .start()
        .await
        .context("Failed to start pipeline")?;

    eprintln!("[Pipeline running; press Ctrl-C to stop]");

    let mut ticker = tokio::time::interval(Duration::from_secs(report_interval.max(1)));
    // First tick fires immediately
    ticker.tick().await;

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupt received");
                break;
            }
            _ = &mut deadline => {
                info!("Run duration elapsed");
                break;
            }
            _ = ticker.tick() => report(&metrics)?,
        }
    }

    orchestrator.stop().await;
    report(&metrics)?;
    eprintln!("[Pipeline stopped]");

    Ok(())
}

/// Print one metrics snapshot as a JSON line
fn report(metrics: &MetricsRuntime) -> Result<()> {
    if !metrics.is_enabled() {
        return Ok(());
    }
    let line =
        serde_json::to_string(&metrics.snapshot()).context("Failed to serialize metrics")?;
    println!("{}", line);
    Ok(())
}

/// List registered plugins per kind
fn list_plugins() -> Result<()> {
    let registry = PluginRegistry::with_builtins();

    for kind in PluginKind::ALL {
        println!("{}:", kind);
        for id in registry.registered(kind) {
            println!("  {}", id);
        }
    }

    Ok(())
}

/// Show the resolved configuration
fn show_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = PipelineConfig::load(config_path.as_deref())?;
    let selection = PluginSelection::from_config(&config)?;
    let settings = OrchestratorSettings::from_config(&config)?;

    println!(
        "Config file: {}",
        config
            .source_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Plugins:");
    println!("  Source:    {}", selection.source);
    println!("  Transform: {}", selection.transform);
    println!("  Sink:      {}", selection.sink);
    println!("  DLQ:       {}", selection.dlq);
    println!("  Cache:     {}", selection.cache);
    println!("  Dedup:     {}", selection.dedup);
    println!();
    println!("Engine:");
    println!("  Max in flight:      {}", settings.max_in_flight);
    println!("  Idle backoff:       {:?}", settings.idle_backoff);
    println!("  Error backoff:      {:?}", settings.error_backoff);
    println!("  Join timeout:       {:?}", settings.join_timeout);
    println!("  Drain timeout:      {:?}", settings.drain_timeout);
    println!("  Disconnect timeout: {:?}", settings.disconnect_timeout);

    let resolved = config.resolved();
    if !resolved.is_empty() {
        println!();
        println!("Resolved keys:");
        for (key, value) in &resolved {
            println!("  {} = {}", key, value);
        }
    }

    Ok(())
}
