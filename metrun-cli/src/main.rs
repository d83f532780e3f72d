//! Metrun CLI
//!
//! Command-line front end: resolves pipeline definitions and drives the
//! background controller over its control socket.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "metrun")]
#[command(about = "Metagenomics pipeline runner", long_about = None)]
struct Cli {
    /// Controller socket path
    #[arg(long, env = "METRUN_SOCKET", default_value = "metrun.sock")]
    socket: PathBuf,

    /// Controller executable, started when no controller is running
    #[arg(long, env = "METRUN_CONTROLLER_BIN", default_value = "metrun-controller")]
    controller_bin: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        socket_path: cli.socket,
        controller_bin: cli.controller_bin,
    };

    handle_command(cli.command, &config).await
}
