//! ephys-sim: headless host for simulated acquisition

mod cli;
mod drain;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command, RunArgs};
use drain::DrainService;
use ephys_simulation::SourceCollection;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Layout(args) => {
            let config = args.resolve()?;
            let layout = config.layout()?;
            println!("{}", serde_json::to_string_pretty(&layout)?);
            Ok(())
        }
        Command::Config(args) => {
            let config = args.resolve()?;
            println!("{}", config.to_json_string()?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.config.resolve()?;
    if let Some(seconds) = args.duration {
        if !seconds.is_finite() || seconds < 0.0 {
            anyhow::bail!("--duration must be a non-negative number of seconds, got {}", seconds);
        }
    }

    let collection = SourceCollection::from_config(&config).context("Failed to build sources")?;
    info!(
        streams = collection.len(),
        channels = config.total_channels(),
        seed = collection.base_seed(),
        "Starting simulated acquisition"
    );

    let mut service = DrainService::new(collection, Duration::from_millis(args.poll_ms), args.max_frames);
    let summary = service.run(shutdown_signal(args.duration)).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Resolves after `duration` or on Ctrl-C, whichever comes first
async fn shutdown_signal(duration: Option<f64>) {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, stopping"),
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    match duration {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
                _ = ctrl_c => {}
            }
        }
        None => ctrl_c.await,
    }
}
