//! Error types for the controller

use std::path::PathBuf;
use thiserror::Error;

/// A queued command could not be started
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Step {0} was already started")]
    AlreadyStarted(u64),

    #[error("Failed to open output file {path}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {source}")]
    Builtin {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// The durable store rejected an operation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No project with id {0}")]
    UnknownProject(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The controller actor is no longer running
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Controller has shut down")]
    Closed,
}

/// The control server stopped abnormally
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}
