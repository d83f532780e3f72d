//! Project and path binding requests

use crate::ControllerClient;
use crate::error::{ClientError, Result};
use crate::jobs::expect_reply;
use metrun_core::domain::history::{PathBinding, ProjectHistory};
use metrun_core::protocol::{NEW_PROJECT_REPLY, Request, decode_paths};

impl ControllerClient {
    // =============================================================================
    // Projects
    // =============================================================================

    /// Open a project
    ///
    /// The controller queues `mkdir <name>` and records subsequent steps
    /// under the new project.
    pub async fn new_project(&mut self, name: impl Into<String>) -> Result<()> {
        let reply = self.request(&Request::New(name.into())).await?;
        expect_reply("new", reply, NEW_PROJECT_REPLY)
    }

    /// List recorded projects with their steps
    pub async fn projects(&mut self) -> Result<Vec<ProjectHistory>> {
        let reply = self.request(&Request::Projects).await?;
        Ok(serde_json::from_str(&reply)?)
    }

    // =============================================================================
    // Path Bindings
    // =============================================================================

    /// List stored tool locations
    pub async fn paths(&mut self) -> Result<Vec<PathBinding>> {
        let reply = self.request(&Request::Paths).await?;
        Ok(decode_paths(&reply)?)
    }

    /// Store the location of a tool
    pub async fn bind(&mut self, name: impl Into<String>, path: impl Into<String>) -> Result<()> {
        let name = name.into();
        let reply = self
            .request(&Request::Bind {
                name: name.clone(),
                path: path.into(),
            })
            .await?;

        if reply == format!("Bound {}.", name) {
            Ok(())
        } else {
            Err(ClientError::unexpected("bind", reply))
        }
    }
}
