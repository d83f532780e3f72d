//! Metrun Controller binary
//!
//! Started in the background by the `metrun` client when no controller socket
//! exists. Logs to a file since it has no terminal.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrun_controller::db::{create_pool, run_migrations};
use metrun_controller::store::{HistoryStore, InMemoryHistoryStore, SqliteHistoryStore};
use metrun_controller::{ControlServer, ControllerConfig, RunController};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    init_logging(&config.log_file)?;
    info!("Starting metrun controller");
    info!(
        "Loaded configuration: socket={}, database={}",
        config.socket_path.display(),
        config.database_path.display()
    );

    let store = open_store(&config.database_path).await;
    let cwd = std::env::current_dir().context("Failed to read working directory")?;

    let controller = RunController::spawn(cwd, store);
    let shutdown_handle = controller.clone();
    let socket_path = config.socket_path.clone();
    let server = ControlServer::new(config, controller);

    tokio::select! {
        result = server.run() => result.context("Control server failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Stopped by user");
            let _ = shutdown_handle.shutdown().await;
            let _ = std::fs::remove_file(&socket_path);
        }
    }

    info!("Controller stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<ControllerConfig> {
    let config = match ControllerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid controller environment ({}), using defaults", e);
            ControllerConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metrun_controller=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();

    Ok(())
}

/// Opens the sqlite store, falling back to memory when it is unavailable
async fn open_store(database_path: &Path) -> Arc<dyn HistoryStore> {
    let pool = match create_pool(database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!(
                "Failed to open database {} ({}), history will not be kept",
                database_path.display(),
                e
            );
            return Arc::new(InMemoryHistoryStore::new());
        }
    };

    if let Err(e) = run_migrations(&pool).await {
        warn!("Failed to run migrations ({}), history will not be kept", e);
        return Arc::new(InMemoryHistoryStore::new());
    }

    Arc::new(SqliteHistoryStore::new(pool))
}
