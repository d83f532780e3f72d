//! Control server
//!
//! Accepts one client at a time on a Unix domain socket and answers
//! newline-delimited requests with one reply line each.
//!
//! The server shuts down when it has waited `idle_timeout` for a client while
//! nothing is running, when a client sends `close`, or when its socket file is
//! removed.

use std::io;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ServerError};
use crate::scheduler::ControllerHandle;
use metrun_core::domain::queue::QueueItem;
use metrun_core::protocol::{
    FAREWELL, NEW_PROJECT_REPLY, NONE_MARKER, Request, SET_WD_REPLY, STOP_REPLY, encode_paths,
    escape_reply,
};

/// Longest request line accepted, in bytes
const MAX_REQUEST_LEN: usize = 64 * 1024;

/// How a client session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Client left; keep accepting
    Exit,
    /// Client asked the server to shut down
    Close,
}

/// Unix socket front end of the run controller
pub struct ControlServer {
    config: ControllerConfig,
    controller: ControllerHandle,
}

impl ControlServer {
    pub fn new(config: ControllerConfig, controller: ControllerHandle) -> Self {
        Self { config, controller }
    }

    /// Binds the socket, replacing a stale one
    pub fn bind(&self) -> io::Result<UnixListener> {
        let path = &self.config.socket_path;
        if path.exists() {
            warn!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }
        UnixListener::bind(path)
    }

    /// Serves clients until shutdown, then stops the controller and removes the socket
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        info!("Waiting for connection on {}", self.config.socket_path.display());

        let result = self.accept_loop(&listener).await;

        info!("Shutting down control server");
        if let Err(e) = self.controller.shutdown().await {
            debug!("Controller already stopped: {}", e);
        }
        remove_socket(&self.config.socket_path);
        result
    }

    async fn accept_loop(&self, listener: &UnixListener) -> Result<(), ServerError> {
        loop {
            if !self.config.socket_path.exists() {
                warn!("Socket removed. Closing.");
                return Ok(());
            }

            let stream = match timeout(self.config.idle_timeout, listener.accept()).await {
                Err(_) => {
                    if self.controller.current_state().is_running() {
                        continue;
                    }
                    info!("No jobs. Exiting.");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    error!("Failed to accept connection: {}", e);
                    return Err(e.into());
                }
                Ok(Ok((stream, _))) => stream,
            };

            info!("User connected");
            match self.serve_client(stream).await {
                Ok(Disconnect::Exit) => info!("Waiting for connection"),
                Ok(Disconnect::Close) => {
                    info!("Closing controller");
                    return Ok(());
                }
                Err(ServerError::Io(e)) => {
                    warn!("Client connection failed: {}", e);
                    info!("Waiting for connection");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn serve_client(&self, stream: UnixStream) -> Result<Disconnect, ServerError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        loop {
            let line = match timeout(self.config.client_timeout, read_request(&mut reader)).await {
                Err(_) => {
                    warn!("Connection timed out.");
                    return Ok(Disconnect::Exit);
                }
                Ok(Ok(None)) => {
                    info!("User disconnected");
                    return Ok(Disconnect::Exit);
                }
                Ok(Ok(Some(line))) => line,
                Ok(Err(e)) => return Err(e.into()),
            };

            let (reply, disconnect) = self.respond(&line).await?;
            debug!("Server got: '{}', sending '{}'", line, reply);

            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            if let Some(disconnect) = disconnect {
                info!("User disconnected");
                return Ok(disconnect);
            }
        }
    }

    /// Answers one request line
    async fn respond(&self, line: &str) -> Result<(String, Option<Disconnect>), ControllerError> {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(echo) => return Ok((echo.to_string(), None)),
        };

        let reply = match request {
            Request::Start(argv) => self.controller.queue(argv).await?.to_string(),
            Request::Status => self.controller.status().await?.to_string(),
            Request::Retval(pid) => self
                .controller
                .retval(pid)
                .await?
                .map(|retval| escape_reply(&retval))
                .unwrap_or_else(|| NONE_MARKER.to_string()),
            Request::Queue => QueueItem::format_list(&self.controller.snapshot().await?),
            Request::SetWd(dir) => {
                self.controller.set_wd(dir).await?;
                SET_WD_REPLY.to_string()
            }
            Request::Stop => {
                self.controller.stop_current().await?;
                STOP_REPLY.to_string()
            }
            Request::New(name) => {
                self.controller.start_project(name).await?;
                NEW_PROJECT_REPLY.to_string()
            }
            Request::Paths => encode_paths(&self.controller.paths().await?),
            Request::Bind { name, path } => {
                self.controller.bind_path(name.as_str(), path).await?;
                format!("Bound {}.", name)
            }
            Request::Projects => {
                let projects = self.controller.projects().await?;
                serde_json::to_string(&projects).unwrap_or_else(|e| {
                    warn!("Failed to encode projects: {}", e);
                    "[]".to_string()
                })
            }
            Request::Exit => return Ok((FAREWELL.to_string(), Some(Disconnect::Exit))),
            Request::Close => return Ok((FAREWELL.to_string(), Some(Disconnect::Close))),
        };

        Ok((reply, None))
    }
}

/// Reads one request line, decoding invalid UTF-8 lossily
///
/// Returns `None` at end of stream. Lines longer than [`MAX_REQUEST_LEN`]
/// are rejected with `InvalidData`.
async fn read_request<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = reader
        .take(MAX_REQUEST_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_REQUEST_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request longer than {} bytes", MAX_REQUEST_LEN),
        ));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove socket {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::RunController;
    use crate::store::InMemoryHistoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::io::Lines;

    struct TestClient {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(path: &Path) -> Self {
            for _ in 0..100 {
                if let Ok(stream) = UnixStream::connect(path).await {
                    let (reader, writer) = stream.into_split();
                    return Self {
                        lines: BufReader::new(reader).lines(),
                        writer,
                    };
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("server never came up");
        }

        async fn ask(&mut self, line: &str) -> String {
            self.ask_bytes(format!("{}\n", line).as_bytes()).await
        }

        async fn ask_bytes(&mut self, bytes: &[u8]) -> String {
            self.writer.write_all(bytes).await.unwrap();
            self.lines.next_line().await.unwrap().unwrap()
        }

        async fn wait_until_idle(&mut self) -> String {
            let mut state = self.ask("status").await;
            for _ in 0..200 {
                if state != "running" {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                state = self.ask("status").await;
            }
            state
        }
    }

    fn start_server(dir: &Path, idle: Duration) -> (std::path::PathBuf, tokio::task::JoinHandle<Result<(), ServerError>>) {
        let socket = dir.join("metrun.sock");
        let mut config = ControllerConfig::new(&socket);
        config.idle_timeout = idle;
        config.client_timeout = Duration::from_secs(5);

        let controller = RunController::spawn(dir, Arc::new(InMemoryHistoryStore::new()));
        let server = ControlServer::new(config, controller);
        (socket, tokio::spawn(server.run()))
    }

    #[tokio::test]
    async fn test_request_replies() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, server) = start_server(dir.path(), Duration::from_secs(5));
        let mut client = TestClient::connect(&socket).await;

        assert_eq!(client.ask("status").await, "idle");
        assert_eq!(client.ask("queue").await, "None");
        assert_eq!(client.ask("retval 0").await, "None");
        assert_eq!(client.ask("hello there").await, "hello: there");
        assert_eq!(client.ask("retval abc").await, "retval: abc");
        assert_eq!(client.ask("set_wd .").await, "Seems fair.");
        assert_eq!(client.ask("bind kraken /opt/kraken2").await, "Bound kraken.");
        assert_eq!(client.ask("paths").await, r#"[["kraken","/opt/kraken2"]]"#);
        assert_eq!(client.ask("stop").await, "I'll ask the controller to stop.");
        assert_eq!(client.ask("close").await, "bye");

        server.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_start_and_retval() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, server) = start_server(dir.path(), Duration::from_secs(5));
        let mut client = TestClient::connect(&socket).await;

        assert_eq!(client.ask("start echo \"hello world\"").await, "0");
        assert_eq!(client.wait_until_idle().await, "finished");
        assert_eq!(client.ask("status").await, "idle");
        assert_eq!(client.ask("retval 0").await, "hello world");
        assert_eq!(client.ask("exit").await, "bye");

        let mut client = TestClient::connect(&socket).await;
        assert_eq!(client.ask("close").await, "bye");
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_multiline_retval_is_one_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, server) = start_server(dir.path(), Duration::from_secs(5));
        let mut client = TestClient::connect(&socket).await;

        assert_eq!(client.ask(r"start printf 'a\nb\n'").await, "0");
        assert_eq!(client.wait_until_idle().await, "finished");
        assert_eq!(client.ask("retval 0").await, r"a\nb");
        assert_eq!(client.ask("status").await, "idle");
        assert_eq!(client.ask("close").await, "bye");
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_echoed_and_session_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, server) = start_server(dir.path(), Duration::from_secs(5));
        let mut client = TestClient::connect(&socket).await;

        assert_eq!(client.ask_bytes(b"foo \xff\xfe\n").await, "foo: \u{fffd}\u{fffd}");
        assert_eq!(client.ask("status").await, "idle");
        assert_eq!(client.ask("close").await, "bye");
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_overlong_request_drops_only_that_client() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, server) = start_server(dir.path(), Duration::from_secs(5));
        let mut client = TestClient::connect(&socket).await;

        let flood = vec![b'x'; MAX_REQUEST_LEN + 16];
        let _ = client.writer.write_all(&flood).await;
        assert!(client.lines.next_line().await.unwrap_or(None).is_none());

        let mut client = TestClient::connect(&socket).await;
        assert_eq!(client.ask("status").await, "idle");
        assert_eq!(client.ask("close").await, "bye");
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_server_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, server) = start_server(dir.path(), Duration::from_millis(100));

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!socket.exists());
    }
}
