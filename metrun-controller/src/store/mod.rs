//! Run history store
//!
//! Projects, the steps queued under them and tool path bindings. The store is
//! trait-based so the controller can fall back to memory when the database is
//! unavailable, and so tests can run without a file.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use metrun_core::domain::history::{PathBinding, ProjectHistory, RunRecord, StepRecord};

pub use memory::InMemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// Durable record of what the controller ran
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Inserts a project and returns its id
    async fn create_project(
        &self,
        name: &str,
        directory: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<i64>;

    /// Stamps a project's finish time
    async fn finish_project(&self, id: i64, finished_at: DateTime<Utc>) -> StoreResult<()>;

    /// Appends a command to a project and returns the step id
    async fn append_step(&self, project_id: i64, command: &str) -> StoreResult<i64>;

    /// All projects, oldest first
    async fn list_projects(&self) -> StoreResult<Vec<RunRecord>>;

    /// Steps of one project in insertion order
    async fn list_steps(&self, project_id: i64) -> StoreResult<Vec<StepRecord>>;

    /// All tool path bindings, ordered by name
    async fn list_paths(&self) -> StoreResult<Vec<PathBinding>>;

    /// Records or replaces the path bound to a tool name
    async fn bind_path(&self, name: &str, path: &str) -> StoreResult<()>;

    /// Every project together with its queued commands
    async fn project_histories(&self) -> StoreResult<Vec<ProjectHistory>> {
        let mut histories = Vec::new();
        for record in self.list_projects().await? {
            let steps = self
                .list_steps(record.id)
                .await?
                .into_iter()
                .map(|step| step.command)
                .collect();
            histories.push(ProjectHistory { record, steps });
        }
        Ok(histories)
    }
}
