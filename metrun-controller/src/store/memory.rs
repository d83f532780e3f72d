//! In-memory history store
//!
//! Used when the database cannot be opened; history lasts as long as the
//! controller process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::HistoryStore;
use crate::error::{StoreError, StoreResult};
use metrun_core::domain::history::{PathBinding, RunRecord, StepRecord};

#[derive(Default)]
struct MemoryState {
    projects: Vec<RunRecord>,
    steps: Vec<StepRecord>,
    paths: BTreeMap<String, String>,
}

/// History store that keeps everything in process memory
#[derive(Default)]
pub struct InMemoryHistoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_project(
        &self,
        name: &str,
        directory: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let mut state = self.state.lock().unwrap();
        let id = state.projects.len() as i64 + 1;
        state.projects.push(RunRecord {
            id,
            name: name.to_string(),
            directory: directory.to_string(),
            started_at,
            finished_at: None,
        });
        Ok(id)
    }

    async fn finish_project(&self, id: i64, finished_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let project = state
            .projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or(StoreError::UnknownProject(id))?;
        project.finished_at = Some(finished_at);
        Ok(())
    }

    async fn append_step(&self, project_id: i64, command: &str) -> StoreResult<i64> {
        let mut state = self.state.lock().unwrap();
        let id = state.steps.len() as i64 + 1;
        state.steps.push(StepRecord {
            id,
            project_id,
            command: command.to_string(),
        });
        Ok(id)
    }

    async fn list_projects(&self) -> StoreResult<Vec<RunRecord>> {
        Ok(self.state.lock().unwrap().projects.clone())
    }

    async fn list_steps(&self, project_id: i64) -> StoreResult<Vec<StepRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .steps
            .iter()
            .filter(|step| step.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_paths(&self) -> StoreResult<Vec<PathBinding>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .paths
            .iter()
            .map(|(name, path)| PathBinding {
                name: name.clone(),
                path: path.clone(),
            })
            .collect())
    }

    async fn bind_path(&self, name: &str, path: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.paths.insert(name.to_string(), path.to_string());
        Ok(())
    }
}
