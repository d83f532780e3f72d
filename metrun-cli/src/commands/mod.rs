//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod pipeline;
mod project;

pub use pipeline::PipelineArgs;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a pipeline and queue its commands on the controller
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Project name (defaults to the pipeline file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Print the resolved commands without queuing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Show a pipeline's groups and resolved commands
    Show {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Check that every tool a pipeline uses can be found
    Check {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Show the controller state
    Status,
    /// List the running and waiting steps
    Queue,
    /// Show the captured output of a step
    Retval {
        /// Step pid
        pid: u64,
    },
    /// Stop the running step and discard the queue
    Stop,
    /// List stored tool locations
    Paths,
    /// Store the location of a tool
    Bind {
        /// Tool name as used in pipeline commands
        name: String,
        /// Path to the executable
        path: String,
    },
    /// List recorded projects and their steps
    History,
    /// Send a raw request line and print the reply
    Send {
        /// Request words
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Interactive request prompt
    Shell,
    /// Disconnect, shutting the controller down when it is idle
    Close {
        /// Shut the controller down even if a step is running
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run {
            pipeline,
            name,
            dry_run,
        } => pipeline::run_pipeline(config, pipeline, name, dry_run).await,
        Commands::Show { pipeline } => pipeline::show_pipeline(pipeline),
        Commands::Check { pipeline } => pipeline::check_pipeline(config, pipeline).await,
        Commands::Status => job::show_status(config).await,
        Commands::Queue => job::show_queue(config).await,
        Commands::Retval { pid } => job::show_retval(config, pid).await,
        Commands::Stop => job::stop(config).await,
        Commands::Send { words } => job::send(config, words).await,
        Commands::Shell => job::shell(config).await,
        Commands::Close { force } => job::close(config, force).await,
        Commands::Paths => project::list_paths(config).await,
        Commands::Bind { name, path } => project::bind(config, &name, &path).await,
        Commands::History => project::history(config).await,
    }
}
