//! Metrun Client
//!
//! Connection to the metrun controller over its Unix control socket.
//!
//! The controller is started on demand: [`ControllerClient::connect_or_spawn`]
//! launches the controller binary in the background when no socket exists and
//! waits for it to come up.
//!
//! # Example
//!
//! ```no_run
//! use metrun_client::ControllerClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut client = ControllerClient::connect_or_spawn("metrun.sock", "metrun-controller").await?;
//!
//!     let pid = client.start(vec!["echo".into(), "hello".into()]).await?;
//!     println!("Queued step {}", pid);
//!
//!     client.close(false).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod projects;

// Re-export commonly used types
pub use error::{ClientError, Result};

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use metrun_core::domain::controller::ControllerState;
use metrun_core::protocol::{FAREWELL, Request};

/// Default time to wait for a single reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client connection to a metrun controller
pub struct ControllerClient {
    /// Path of the control socket
    socket_path: PathBuf,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    reply_timeout: Duration,
}

impl ControllerClient {
    /// Connects to a running controller
    ///
    /// # Arguments
    /// * `socket_path` - Filesystem path of the control socket
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: socket_path.clone(),
                source,
            })?;

        debug!("Connected to controller at {}", socket_path.display());
        let (reader, writer) = stream.into_split();
        Ok(Self {
            socket_path,
            lines: BufReader::new(reader).lines(),
            writer,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// Connects to the controller, starting it first if its socket is missing
    ///
    /// Retries with exponential backoff while the new controller binds its socket.
    ///
    /// # Arguments
    /// * `socket_path` - Filesystem path of the control socket
    /// * `controller_bin` - Controller executable to launch when needed
    pub async fn connect_or_spawn(
        socket_path: impl AsRef<Path>,
        controller_bin: impl AsRef<Path>,
    ) -> Result<Self> {
        const MAX_RETRIES: u32 = 8;
        const INITIAL_DELAY_MS: u64 = 50;
        const MAX_DELAY_MS: u64 = 1_000;

        let socket_path = socket_path.as_ref();
        if !socket_path.exists() {
            spawn_controller(controller_bin.as_ref(), socket_path)?;
        }

        let mut attempt = 0;
        let mut delay_ms = INITIAL_DELAY_MS;

        loop {
            attempt += 1;

            match Self::connect(socket_path).await {
                Ok(client) => return Ok(client),
                Err(e) if e.is_unavailable() && attempt < MAX_RETRIES => {
                    debug!(
                        "Controller not ready (attempt {}/{}), retrying in {} ms",
                        attempt, MAX_RETRIES, delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
                }
                Err(e) => {
                    warn!("Giving up on controller after {} attempt(s)", attempt);
                    return Err(e);
                }
            }
        }
    }

    /// Sets how long to wait for each reply
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Get the control socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends a raw request line and returns the reply line
    pub async fn ask(&mut self, line: &str) -> Result<String> {
        let line = line.trim();
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let reply = tokio::time::timeout(self.reply_timeout, self.lines.next_line())
            .await
            .map_err(|_| ClientError::Timeout(line.to_string()))??
            .ok_or(ClientError::Disconnected)?;

        debug!("Sent '{}', got '{}'", line, reply);
        Ok(reply)
    }

    /// Encodes and sends a typed request
    pub(crate) async fn request(&mut self, request: &Request) -> Result<String> {
        let line = request.encode()?;
        self.ask(&line).await
    }

    /// Leaves the session
    ///
    /// Shuts the controller down as well when nothing is running, or
    /// unconditionally when `stop_running` is set.
    pub async fn close(mut self, stop_running: bool) -> Result<()> {
        let request = if stop_running || self.status().await? != ControllerState::Running {
            Request::Close
        } else {
            Request::Exit
        };

        let reply = self.request(&request).await?;
        if reply != FAREWELL {
            return Err(ClientError::unexpected(request.encode()?, reply));
        }
        Ok(())
    }
}

/// Launches the controller detached from this process
fn spawn_controller(controller_bin: &Path, socket_path: &Path) -> Result<()> {
    info!(
        "Starting controller {} on {}",
        controller_bin.display(),
        socket_path.display()
    );

    Command::new(controller_bin)
        .env("METRUN_SOCKET", socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|source| ClientError::Spawn {
            program: controller_bin.to_path_buf(),
            source,
        })?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Serves one connection, answering each line from `replies` in order
    pub(crate) fn fake_controller(
        socket: &Path,
        replies: Vec<(&'static str, &'static str)>,
    ) -> tokio::task::JoinHandle<()> {
        let listener = UnixListener::bind(socket).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            for (expected, reply) in replies {
                let line = lines.next_line().await.unwrap().unwrap();
                assert_eq!(line, expected);
                writer.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
            }
        })
    }

    #[tokio::test]
    async fn test_connect_without_controller_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = ControllerClient::connect(dir.path().join("metrun.sock")).await;
        assert!(matches!(result, Err(ref e) if e.is_unavailable()));
    }

    #[tokio::test]
    async fn test_missing_controller_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = ControllerClient::connect_or_spawn(
            dir.path().join("metrun.sock"),
            dir.path().join("no-such-controller"),
        )
        .await;
        assert!(matches!(result, Err(ClientError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_ask_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("metrun.sock");
        let server = fake_controller(&socket, vec![("hello there", "hello: there")]);

        let mut client = ControllerClient::connect(&socket).await.unwrap();
        assert_eq!(client.socket_path(), socket.as_path());
        assert_eq!(client.ask("hello there\n").await.unwrap(), "hello: there");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_keeps_busy_controller_alive() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("metrun.sock");
        let server = fake_controller(&socket, vec![("status", "running"), ("exit", "bye")]);

        let client = ControllerClient::connect(&socket).await.unwrap();
        client.close(false).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_idle_controller() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("metrun.sock");
        let server = fake_controller(&socket, vec![("status", "idle"), ("close", "bye")]);

        let client = ControllerClient::connect(&socket).await.unwrap();
        client.close(false).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("metrun.sock");
        let server = fake_controller(&socket, vec![]);

        let mut client = ControllerClient::connect(&socket).await.unwrap();
        server.await.unwrap();
        assert!(matches!(
            client.ask("status").await,
            Err(ClientError::Disconnected) | Err(ClientError::Io(_))
        ));
    }
}
