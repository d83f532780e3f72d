//! Error types for pipeline definitions

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or editing a pipeline definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The source file could not be read
    #[error("Failed to read pipeline source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source is not a structurally valid pipeline document
    #[error("Invalid pipeline source: {0}")]
    Parse(#[from] serde_json::Error),

    /// No group at the given index
    #[error("No group at index {0}")]
    GroupIndex(usize),

    /// No command at the given position
    #[error("No command {command} in group {group}")]
    CommandIndex { group: usize, command: usize },

    /// Only optional groups may be disabled
    #[error("Group '{0}' is not optional and cannot be disabled")]
    GroupNotOptional(String),

    /// The command declares no such option
    #[error("Command '{command}' has no option '{option}'")]
    UnknownOption { command: String, option: String },
}
