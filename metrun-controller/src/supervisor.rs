//! Process supervisor
//!
//! Runs one queued command as a child process and reports how it ended.
//! Each supervisor is single use: `idle -> running -> completed | failed | aborted`.
//!
//! A trailing `>file` argument redirects the child's stdout to `file` (relative
//! to the child's working directory). Otherwise stdout is captured and handed
//! back as the step's return value.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SpawnError;
use metrun_core::domain::process::ProcessStatus;

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    /// Trimmed stdout, when captured and non-empty
    pub retval: Option<String>,
}

impl Outcome {
    fn without_output(status: ProcessStatus) -> Self {
        Self {
            status,
            exit_code: None,
            retval: None,
        }
    }
}

/// Supervises a single command
pub struct Supervisor {
    pid: u64,
    argv: Vec<String>,
    default_dir: PathBuf,
    status: ProcessStatus,
    started: bool,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Outcome>>,
}

impl Supervisor {
    /// Creates a supervisor for `argv`
    ///
    /// # Arguments
    /// * `pid` - Queue id of the step
    /// * `argv` - Program and arguments
    /// * `default_dir` - Working directory used when `start` is given none
    pub fn new(pid: u64, argv: Vec<String>, default_dir: impl Into<PathBuf>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            pid,
            argv,
            default_dir: default_dir.into(),
            status: ProcessStatus::Idle,
            started: false,
            stop_tx,
            task: None,
        }
    }

    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// Name of the program being run
    pub fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// True once the child process exists
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Spawns the child process
    pub fn start(&mut self, dir: Option<&Path>) -> Result<(), SpawnError> {
        if self.started {
            return Err(SpawnError::AlreadyStarted(self.pid));
        }

        let (program, args) = self.argv.split_first().ok_or(SpawnError::EmptyCommand)?;
        let workdir = dir.unwrap_or(&self.default_dir).to_path_buf();

        let (args, redirect) = match args.split_last() {
            Some((last, rest)) if last.starts_with('>') => {
                (rest, Some(workdir.join(last.trim_start_matches('>').trim())))
            }
            _ => (args, None),
        };

        let stdout = match &redirect {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(|source| SpawnError::Redirect {
                    path: path.clone(),
                    source,
                })?;
                Stdio::from(file)
            }
            None => Stdio::piped(),
        };

        let child = Command::new(program)
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                program: program.clone(),
                source,
            })?;

        info!(
            "Started step {} ({}) in {}",
            self.pid,
            self.argv.join(" "),
            workdir.display()
        );

        let stop_rx = self.stop_tx.subscribe();
        self.task = Some(tokio::spawn(supervise(
            self.pid,
            program.clone(),
            child,
            stop_rx,
        )));
        self.started = true;
        self.status = ProcessStatus::Running;
        Ok(())
    }

    /// Asks the child to stop; safe to call repeatedly
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Waits for the child to end
    ///
    /// Cancel safe: dropping the future before it resolves leaves the
    /// supervisor waiting.
    pub async fn wait(&mut self) -> Outcome {
        let outcome = match self.task.as_mut() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Supervision of step {} panicked: {}", self.pid, e);
                    Outcome::without_output(ProcessStatus::Failed)
                }
            },
            None => return Outcome::without_output(self.status),
        };

        self.task = None;
        self.status = outcome.status;
        outcome
    }
}

async fn supervise(
    pid: u64,
    program: String,
    mut child: Child,
    mut stop_rx: watch::Receiver<bool>,
) -> Outcome {
    let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(log_lines(program.clone(), err)));

    let exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = stop_rx.wait_for(|stop| *stop) => None,
    };

    let outcome = match exit {
        None => {
            info!("Stopping step {} ({})", pid, program);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill step {}: {}", pid, e);
            }
            // Descendants of the child may still hold the pipes open
            if let Some(reader) = &stdout {
                reader.abort();
            }
            if let Some(reader) = &stderr {
                reader.abort();
            }
            Outcome::without_output(ProcessStatus::Aborted)
        }
        Some(Err(e)) => {
            error!("Failed to wait for step {}: {}", pid, e);
            Outcome::without_output(ProcessStatus::Failed)
        }
        Some(Ok(status)) => {
            let retval = match stdout {
                Some(reader) => reader.await.ok().flatten(),
                None => None,
            };
            Outcome {
                status: if status.success() {
                    ProcessStatus::Completed
                } else {
                    ProcessStatus::Failed
                },
                exit_code: status.code(),
                retval,
            }
        }
    };

    if let Some(reader) = stderr {
        let _ = reader.await;
    }

    debug!("Step {} ended: {:?}", pid, outcome);
    outcome
}

/// Reads a stream to the end and returns it trimmed, if non-empty
async fn read_all(mut stream: impl AsyncRead + Unpin) -> Option<String> {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        warn!("Failed to read step output: {}", e);
    }
    let text = String::from_utf8_lossy(&buf).trim().to_string();
    (!text.is_empty()).then_some(text)
}

async fn log_lines(program: String, stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!("[{}] {}", program, line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading stderr of {}: {}", program, e);
                break;
            }
        }
    }
}
