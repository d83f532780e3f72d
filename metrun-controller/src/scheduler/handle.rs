//! Controller handle
//!
//! Cloneable front door to the [`RunController`](super::RunController) actor.
//! Every call sends one message and waits for the actor's reply.

use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::ControllerError;
use metrun_core::domain::controller::ControllerState;
use metrun_core::domain::history::{PathBinding, ProjectHistory};
use metrun_core::domain::queue::QueueItem;

/// Messages understood by the controller actor
pub(crate) enum ControlMessage {
    Queue {
        argv: Vec<String>,
        reply: oneshot::Sender<u64>,
    },
    Status {
        reply: oneshot::Sender<ControllerState>,
    },
    Retval {
        pid: u64,
        reply: oneshot::Sender<Option<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<QueueItem>>,
    },
    SetWd {
        dir: String,
        reply: oneshot::Sender<PathBuf>,
    },
    StopCurrent {
        reply: oneshot::Sender<()>,
    },
    StartProject {
        name: String,
        reply: oneshot::Sender<u64>,
    },
    Paths {
        reply: oneshot::Sender<Vec<PathBinding>>,
    },
    BindPath {
        name: String,
        path: String,
        reply: oneshot::Sender<()>,
    },
    Projects {
        reply: oneshot::Sender<Vec<ProjectHistory>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlMessage>,
    state: watch::Receiver<ControllerState>,
}

impl ControllerHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<ControlMessage>,
        state: watch::Receiver<ControllerState>,
    ) -> Self {
        Self { tx, state }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlMessage,
    ) -> Result<T, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    /// Enqueues a command and returns its pid
    pub async fn queue(&self, argv: Vec<String>) -> Result<u64, ControllerError> {
        self.request(|reply| ControlMessage::Queue { argv, reply })
            .await
    }

    /// Reports the controller state
    ///
    /// Observing `finished` resets the controller to `idle`.
    pub async fn status(&self) -> Result<ControllerState, ControllerError> {
        self.request(|reply| ControlMessage::Status { reply }).await
    }

    /// Current state, without counting as an observation
    pub fn current_state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Captured result of a completed step
    pub async fn retval(&self, pid: u64) -> Result<Option<String>, ControllerError> {
        self.request(|reply| ControlMessage::Retval { pid, reply })
            .await
    }

    /// Running step first, then waiting steps in dispatch order
    pub async fn snapshot(&self) -> Result<Vec<QueueItem>, ControllerError> {
        self.request(|reply| ControlMessage::Snapshot { reply })
            .await
    }

    /// Sets the directory external commands run in; returns the resolved path
    pub async fn set_wd(&self, dir: impl Into<String>) -> Result<PathBuf, ControllerError> {
        let dir = dir.into();
        self.request(|reply| ControlMessage::SetWd { dir, reply })
            .await
    }

    /// Clears the queue and kills the running step
    pub async fn stop_current(&self) -> Result<(), ControllerError> {
        self.request(|reply| ControlMessage::StopCurrent { reply })
            .await
    }

    /// Opens a project; returns the pid of its `mkdir` step
    pub async fn start_project(&self, name: impl Into<String>) -> Result<u64, ControllerError> {
        let name = name.into();
        self.request(|reply| ControlMessage::StartProject { name, reply })
            .await
    }

    pub async fn paths(&self) -> Result<Vec<PathBinding>, ControllerError> {
        self.request(|reply| ControlMessage::Paths { reply }).await
    }

    pub async fn bind_path(
        &self,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<(), ControllerError> {
        let (name, path) = (name.into(), path.into());
        self.request(|reply| ControlMessage::BindPath { name, path, reply })
            .await
    }

    pub async fn projects(&self) -> Result<Vec<ProjectHistory>, ControllerError> {
        self.request(|reply| ControlMessage::Projects { reply })
            .await
    }

    /// Stops the running step and ends the actor
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.request(|reply| ControlMessage::Shutdown { reply })
            .await
    }
}
