//! Genstream Binary
//!
//! Serves the job API, or prints the effective configuration.

use anyhow::Context;
use clap::Parser;
use genstream::cli::{Cli, Commands};
use genstream::config::GenstreamConfig;
use genstream::logging::init_logging;
use genstream::server::{self, AppState};
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let result = match cli.command {
        Commands::Config => print_config(&config),
        Commands::Serve { .. } => run_server(config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("{:#}", e);
        process::exit(1);
    }
}

fn print_config(config: &GenstreamConfig) -> anyhow::Result<()> {
    println!("{}", config.to_toml()?);
    Ok(())
}

fn run_server(config: GenstreamConfig) -> anyhow::Result<()> {
    config.ensure_valid()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: GenstreamConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    info!(
        provider = state.orchestrator.provider_name(),
        "Genstream starting"
    );

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for shutdown signal"),
        }
    });

    server::serve(listener, state, config.jobs.sweep_interval(), shutdown).await?;
    Ok(())
}
