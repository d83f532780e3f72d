//! Run controller
//!
//! Actor task that owns the step queue and the single in-flight process.
//! Steps run strictly one at a time, lowest pid first. A failed or aborted
//! step clears whatever is still queued.
//!
//! `mkdir` and `cd` steps are handled in-process against a logical working
//! directory; the controller never changes its own process directory.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::handle::{ControlMessage, ControllerHandle};
use crate::error::SpawnError;
use crate::store::HistoryStore;
use crate::supervisor::{Outcome, Supervisor};
use metrun_core::domain::controller::ControllerState;
use metrun_core::domain::process::ProcessStatus;
use metrun_core::domain::queue::{QueueEntry, QueueItem};
use metrun_core::paths::absolutize;

const CHANNEL_CAPACITY: usize = 32;

/// The run controller actor
pub struct RunController {
    requests: mpsc::Receiver<ControlMessage>,
    state_tx: watch::Sender<ControllerState>,
    store: Arc<dyn HistoryStore>,

    queue: BTreeMap<u64, QueueEntry>,
    next_pid: u64,
    current: Option<Supervisor>,
    retvals: HashMap<u64, String>,

    /// Logical working directory, moved by `cd` steps
    cwd: PathBuf,
    /// Directory external commands run in, when set
    wd: Option<PathBuf>,
    project_id: Option<i64>,
    state: ControllerState,
}

impl RunController {
    /// Creates a controller rooted at `cwd` and the handle that drives it
    pub fn new(cwd: impl Into<PathBuf>, store: Arc<dyn HistoryStore>) -> (Self, ControllerHandle) {
        let (tx, requests) = mpsc::channel(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ControllerState::Idle);

        let controller = Self {
            requests,
            state_tx,
            store,
            queue: BTreeMap::new(),
            next_pid: 0,
            current: None,
            retvals: HashMap::new(),
            cwd: cwd.into(),
            wd: None,
            project_id: None,
            state: ControllerState::Idle,
        };
        (controller, ControllerHandle::new(tx, state_rx))
    }

    /// Spawns a controller task and returns its handle
    pub fn spawn(cwd: impl Into<PathBuf>, store: Arc<dyn HistoryStore>) -> ControllerHandle {
        let (controller, handle) = Self::new(cwd, store);
        tokio::spawn(controller.run());
        handle
    }

    /// Runs until shut down or every handle is dropped
    pub async fn run(mut self) {
        info!("Starting run controller in {}", self.cwd.display());

        loop {
            tokio::select! {
                message = self.requests.recv() => match message {
                    Some(message) => {
                        if self.handle(message).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        self.abort_current().await;
                        break;
                    }
                },
                outcome = wait_current(&mut self.current) => {
                    self.on_step_ended(outcome).await;
                }
            }
        }

        info!("Run controller finishing");
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            debug!("Controller state {} -> {}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    async fn handle(&mut self, message: ControlMessage) -> ControlFlow<()> {
        match message {
            ControlMessage::Queue { argv, reply } => {
                let pid = self.enqueue(argv).await;
                let _ = reply.send(pid);
                self.pump().await;
            }
            ControlMessage::Status { reply } => {
                let state = self.state;
                let _ = reply.send(state);
                if state == ControllerState::Finished {
                    self.set_state(ControllerState::Idle);
                }
            }
            ControlMessage::Retval { pid, reply } => {
                let _ = reply.send(self.retvals.get(&pid).cloned());
            }
            ControlMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ControlMessage::SetWd { dir, reply } => {
                let wd = absolutize(&self.cwd, &dir);
                info!("Working directory set to {}", wd.display());
                self.wd = Some(wd.clone());
                let _ = reply.send(wd);
            }
            ControlMessage::StopCurrent { reply } => {
                self.queue.clear();
                self.abort_current().await;
                self.set_state(ControllerState::Idle);
                let _ = reply.send(());
            }
            ControlMessage::StartProject { name, reply } => {
                let pid = self.start_project(name).await;
                let _ = reply.send(pid);
                self.pump().await;
            }
            ControlMessage::Paths { reply } => {
                let paths = self.store.list_paths().await.unwrap_or_else(|e| {
                    warn!("Failed to list paths: {}", e);
                    Vec::new()
                });
                let _ = reply.send(paths);
            }
            ControlMessage::BindPath { name, path, reply } => {
                match self.store.bind_path(&name, &path).await {
                    Ok(()) => info!("Bound {} to {}", name, path),
                    Err(e) => warn!("Failed to bind {}: {}", name, e),
                }
                let _ = reply.send(());
            }
            ControlMessage::Projects { reply } => {
                let projects = self.store.project_histories().await.unwrap_or_else(|e| {
                    warn!("Failed to list projects: {}", e);
                    Vec::new()
                });
                let _ = reply.send(projects);
            }
            ControlMessage::Shutdown { reply } => {
                self.abort_current().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Adds a step to the queue and records it under the open project
    async fn enqueue(&mut self, mut argv: Vec<String>) -> u64 {
        let pid = self.next_pid;
        self.next_pid += 1;

        if let Some(program) = argv.first_mut() {
            if program.starts_with('.') {
                *program = absolutize(&self.cwd, program.as_str())
                    .to_string_lossy()
                    .into_owned();
            }
        }

        let command = argv.join(" ");
        info!("Adding step {}: {}", pid, command);
        if let Some(project_id) = self.project_id {
            if let Err(e) = self.store.append_step(project_id, &command).await {
                warn!("Failed to record step {}: {}", pid, e);
            }
        }

        self.queue.insert(pid, QueueEntry { pid, argv });
        pid
    }

    async fn start_project(&mut self, name: String) -> u64 {
        let directory = self
            .wd
            .clone()
            .unwrap_or_else(|| self.cwd.join(&name))
            .to_string_lossy()
            .into_owned();

        match self
            .store
            .create_project(&name, &directory, Utc::now())
            .await
        {
            Ok(id) => {
                info!("Setting project_id = {}", id);
                self.project_id = Some(id);
            }
            Err(e) => {
                warn!("Failed to record project {}: {}", name, e);
                self.project_id = None;
            }
        }

        self.enqueue(vec!["mkdir".to_string(), name]).await
    }

    fn snapshot(&self) -> Vec<QueueItem> {
        let mut items = Vec::with_capacity(self.queue.len() + 1);
        if let Some(current) = &self.current {
            items.push(QueueItem::running(current.name()));
        }
        items.extend(self.queue.values().map(|entry| QueueItem::waiting(entry.name())));
        items
    }

    /// Dispatches queued steps until one is in flight or the queue is empty
    async fn pump(&mut self) {
        while self.current.is_none() {
            let Some((pid, entry)) = self.queue.pop_first() else {
                break;
            };
            self.set_state(ControllerState::Running);

            if let Err(e) = self.dispatch(entry) {
                error!("Step {} could not run: {}", pid, e);
                self.fail();
                return;
            }
        }

        if self.current.is_none() && self.queue.is_empty() && self.state.is_running() {
            self.set_state(ControllerState::Finished);
            self.finish_project().await;
        }
    }

    fn dispatch(&mut self, entry: QueueEntry) -> Result<(), SpawnError> {
        match entry.argv.as_slice() {
            [command, dir, ..] if command == "mkdir" => {
                let dir = absolutize(&self.cwd, dir);
                debug!("mkdir {}", dir.display());
                return std::fs::create_dir_all(&dir).map_err(|source| SpawnError::Builtin {
                    command: format!("mkdir {}", dir.display()),
                    source,
                });
            }
            [command, dir, ..] if command == "cd" => {
                let dir = absolutize(&self.cwd, dir);
                change_dir(&dir)?;
                debug!("cd {}", dir.display());
                self.cwd = dir;
                return Ok(());
            }
            _ => {}
        }

        let mut supervisor = Supervisor::new(entry.pid, entry.argv, self.cwd.clone());
        supervisor.start(self.wd.as_deref())?;
        self.current = Some(supervisor);
        Ok(())
    }

    async fn on_step_ended(&mut self, outcome: Outcome) {
        let Some(supervisor) = self.current.take() else {
            return;
        };

        match outcome.status {
            ProcessStatus::Completed => {
                if let Some(retval) = outcome.retval {
                    info!("Retval: {}", retval);
                    self.retvals.insert(supervisor.pid(), retval);
                }
            }
            status => {
                error!("{} {}", supervisor.name(), status);
                self.fail();
            }
        }

        self.pump().await;
    }

    /// Drops everything still queued after a failed step
    fn fail(&mut self) {
        if !self.queue.is_empty() {
            warn!("Discarding {} queued step(s)", self.queue.len());
        }
        self.queue.clear();
        self.set_state(ControllerState::Idle);
    }

    /// Kills the in-flight step, if any, and waits for it to be reaped
    async fn abort_current(&mut self) {
        if let Some(mut supervisor) = self.current.take() {
            supervisor.stop();
            let outcome = supervisor.wait().await;
            info!(
                "Step {} ({}) stopped: {}",
                supervisor.pid(),
                supervisor.name(),
                outcome.status
            );
        }
    }

    async fn finish_project(&mut self) {
        let Some(project_id) = self.project_id else {
            return;
        };
        if let Err(e) = self.store.finish_project(project_id, Utc::now()).await {
            warn!("Failed to stamp project {}: {}", project_id, e);
        }
    }
}

async fn wait_current(current: &mut Option<Supervisor>) -> Outcome {
    match current {
        Some(supervisor) => supervisor.wait().await,
        None => std::future::pending().await,
    }
}

fn change_dir(dir: &Path) -> Result<(), SpawnError> {
    let builtin_error = |source| SpawnError::Builtin {
        command: format!("cd {}", dir.display()),
        source,
    };
    let metadata = std::fs::metadata(dir).map_err(builtin_error)?;
    if !metadata.is_dir() {
        return Err(builtin_error(std::io::Error::other("not a directory")));
    }
    Ok(())
}
