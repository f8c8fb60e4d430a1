//! Switchboard binary - composition root.
//!
//! 1. Parse CLI and load configuration from TOML
//! 2. Build executors and the action dispatcher
//! 3. Start the job sweeper
//! 4. Serve the HTTP API until Ctrl-C

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard_action::{spawn_sweeper, Dispatcher, Executors};
use switchboard_api::state::AppState;
use switchboard_core::SwitchboardConfig;

use cli::CliArgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. A missing file means defaults; a broken one is fatal.
    let config_file = args.resolve_config_path();
    let config = if config_file.exists() {
        SwitchboardConfig::load(&config_file)?
    } else {
        SwitchboardConfig::default()
    };

    // Tracing. RUST_LOG wins over the resolved level.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Switchboard v{}", env!("CARGO_PKG_VERSION"));
    if config_file.exists() {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file, using defaults");
    }

    // Engine.
    let executors = Executors::from_config(&config)?;
    let dispatcher = Dispatcher::new(config.actions.clone(), executors);
    tracing::info!(
        rate_limit_per_minute = config.actions.rate_limit_per_minute,
        job_ttl_secs = config.actions.job_ttl_secs,
        "Action dispatcher ready"
    );

    let sweeper = spawn_sweeper(
        Arc::clone(dispatcher.jobs()),
        Duration::from_secs(config.actions.sweep_interval_secs),
    );

    // === API server ===

    let addr = args.resolve_bind(&config.general.bind_addr);
    let state = AppState::new(dispatcher);
    let served = switchboard_api::start_server(&addr, state, shutdown_signal()).await;

    sweeper.abort();
    if let Err(e) = served {
        tracing::error!(addr = %addr, error = %e, "API server failed");
        return Err(e.into());
    }

    tracing::info!("Switchboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
