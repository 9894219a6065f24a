//! Tempo engine binary.
//!
//! This is the main entry point that wires together the simulated clock,
//! the tick engine, collaborator handlers, and the admin API. It loads
//! configuration, bootstraps listeners and recurring jobs, and runs until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `TEMPO_CONFIG` or `tempo-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Create the engine from the clock and engine config
//! 4. Bootstrap collaborator listeners and recurring jobs (starts the
//!    engine)
//! 5. Start the admin API server
//! 6. Wait for `Ctrl-C`, then shut down gracefully

mod collaborator;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use tempo_admin::AppState;
use tempo_core::config::{DriverMode, LogFormat, LoggingConfig, TempoConfig};
use tempo_core::{Bootstrapper, Engine};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;

/// Config file used when `TEMPO_CONFIG` is not set.
const DEFAULT_CONFIG_PATH: &str = "tempo-config.yaml";

/// Where the configuration came from.
#[derive(Debug)]
enum ConfigSource {
    File(PathBuf),
    Defaults(PathBuf),
}

/// Application entry point for the Tempo engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("tempo-engine starting");
    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "Configuration loaded"),
        ConfigSource::Defaults(path) => {
            warn!(path = %path.display(), "Config file not found, using defaults");
        }
    }
    info!(
        start_time = %config.clock.start_time,
        tick_interval_ms = config.clock.tick_interval_ms,
        time_multiplier = config.clock.time_multiplier,
        driver = ?config.engine.driver,
        jobs = config.jobs.len(),
        "Engine configuration"
    );

    // 3. Create the engine.
    let engine = Engine::from_config(&config)?;

    // 4. Bootstrap listeners and jobs.
    let client = collaborator::build_client(&config.collaborator)?;
    let plan = collaborator::bootstrap_plan(&config, &client)?;
    let bootstrapper = Bootstrapper::new(plan);
    bootstrapper.initialize(&engine)?;
    info!(
        collaborator = config.collaborator.base_url,
        "Collaborator handlers registered"
    );

    // 5. Start the admin API server.
    let shutdown = Arc::new(Notify::new());
    let admin_handle = if config.admin.enabled {
        let state = Arc::new(AppState::new(engine.clone()));
        let signal = Arc::clone(&shutdown);
        let handle = tempo_admin::spawn_admin(&config.admin, state, async move {
            signal.notified().await;
        })
        .await
        .map_err(ServerError::from)?;
        Some(handle)
    } else {
        if config.engine.driver == DriverMode::External {
            warn!("External driver with the admin API disabled: nothing will tick");
        }
        None
    };

    // 6. Run until interrupted.
    tokio::signal::ctrl_c().await.map_err(ServerError::from)?;
    info!("Shutdown signal received");

    shutdown.notify_one();
    engine.shutdown().await;
    if let Some(handle) = admin_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Admin server task ended abnormally");
        }
    }

    let snapshot = engine.snapshot();
    info!(
        final_time = %snapshot.current_time,
        total_ticks = snapshot.tick_count,
        pending_events = snapshot.pending_events,
        deliveries = snapshot.dispatch.deliveries,
        handler_failures = snapshot.dispatch.handler_failures,
        "tempo-engine shutdown complete"
    );

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load configuration from `TEMPO_CONFIG` or [`DEFAULT_CONFIG_PATH`].
///
/// A missing file falls back to defaults with environment overrides
/// applied.
fn load_config() -> Result<(TempoConfig, ConfigSource), ServerError> {
    let path = std::env::var_os("TEMPO_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if path.exists() {
        let config = TempoConfig::from_file(&path)?;
        Ok((config, ConfigSource::File(path)))
    } else {
        let mut config = TempoConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok((config, ConfigSource::Defaults(path)))
    }
}
