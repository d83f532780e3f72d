//! Configuration module
//!
//! Where the controller socket lives and how to start the controller.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::debug;

use metrun_client::ControllerClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the controller's control socket
    pub socket_path: PathBuf,

    /// Controller executable, started when no socket exists
    pub controller_bin: PathBuf,
}

impl Config {
    /// Connects to the controller, starting it when `spawn` is set
    pub async fn connect(&self, spawn: bool) -> Result<ControllerClient> {
        debug!("Connecting to {} (spawn: {})", self.socket_path.display(), spawn);
        let client = if spawn {
            ControllerClient::connect_or_spawn(&self.socket_path, &self.controller_bin).await
        } else {
            ControllerClient::connect(&self.socket_path).await
        };

        client.with_context(|| {
            format!(
                "Could not reach the controller at {}",
                self.socket_path.display()
            )
        })
    }
}
