//! Run controller state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of the run controller as reported by `status`
///
/// `Finished` is reported once after the queue drains; the controller drops
/// back to `Idle` as soon as that has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    #[default]
    Idle,
    Running,
    Finished,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Running => "running",
            ControllerState::Finished => "finished",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ControllerState::Running)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "idle" => Ok(ControllerState::Idle),
            "running" => Ok(ControllerState::Running),
            "finished" => Ok(ControllerState::Finished),
            other => Err(format!("unknown controller state '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_text() {
        for state in [
            ControllerState::Idle,
            ControllerState::Running,
            ControllerState::Finished,
        ] {
            assert_eq!(state.to_string().parse::<ControllerState>(), Ok(state));
        }
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        assert!("busy".parse::<ControllerState>().is_err());
    }
}
