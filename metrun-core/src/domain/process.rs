//! External process lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single supervised external invocation
///
/// Transitions: `Idle -> Running -> {Completed | Failed | Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl ProcessStatus {
    /// True once the process can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Idle => "idle",
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
