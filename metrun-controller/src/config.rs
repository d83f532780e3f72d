//! Controller configuration
//!
//! Socket location, durable store, log destination and the two wait bounds
//! used by the control server.

use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Filesystem path of the control socket
    pub socket_path: PathBuf,

    /// Sqlite database holding projects, steps and path bindings
    pub database_path: PathBuf,

    /// File the detached controller logs to
    pub log_file: PathBuf,

    /// How long to wait for a client before checking whether to shut down
    pub idle_timeout: Duration,

    /// How long a connected client may stay silent before being dropped
    pub client_timeout: Duration,
}

impl ControllerConfig {
    /// Creates a configuration for the given socket with default settings
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            database_path: PathBuf::from("metrun.sqlite3"),
            log_file: PathBuf::from("metrun.log"),
            idle_timeout: Duration::from_secs(10),
            client_timeout: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - METRUN_SOCKET (default: metrun.sock)
    /// - METRUN_DATABASE (default: metrun.sqlite3)
    /// - METRUN_LOG_FILE (default: metrun.log)
    /// - METRUN_IDLE_TIMEOUT (seconds, default: 10)
    /// - METRUN_CLIENT_TIMEOUT (seconds, default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let path_var = |name: &str, default: PathBuf| {
            std::env::var_os(name).map(PathBuf::from).unwrap_or(default)
        };
        let secs_var = |name: &str, default: Duration| -> anyhow::Result<Duration> {
            match std::env::var(name) {
                Ok(value) => value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| anyhow::anyhow!("{} must be a number of seconds, got '{}'", name, value)),
                Err(_) => Ok(default),
            }
        };

        Ok(Self {
            socket_path: path_var("METRUN_SOCKET", defaults.socket_path),
            database_path: path_var("METRUN_DATABASE", defaults.database_path),
            log_file: path_var("METRUN_LOG_FILE", defaults.log_file),
            idle_timeout: secs_var("METRUN_IDLE_TIMEOUT", defaults.idle_timeout)?,
            client_timeout: secs_var("METRUN_CLIENT_TIMEOUT", defaults.client_timeout)?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            anyhow::bail!("socket_path cannot be empty");
        }

        if self.database_path.as_os_str().is_empty() {
            anyhow::bail!("database_path cannot be empty");
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("idle_timeout must be greater than 0");
        }

        if self.client_timeout.is_zero() {
            anyhow::bail!("client_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new("metrun.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("metrun.sock"));
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.client_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ControllerConfig::default();

        config.socket_path = PathBuf::new();
        assert!(config.validate().is_err());

        config.socket_path = PathBuf::from("/tmp/metrun.sock");
        config.idle_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.idle_timeout = Duration::from_secs(1);
        assert!(config.validate().is_ok());
    }
}
