//! Sqlite-backed history store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::HistoryStore;
use crate::error::{StoreError, StoreResult};
use metrun_core::domain::history::{PathBinding, RunRecord, StepRecord};

/// History store over a sqlite connection pool
#[derive(Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Wraps a pool whose schema has already been migrated
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn create_project(
        &self,
        name: &str,
        directory: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO projects (name, directory, started)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(directory)
        .bind(started_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn finish_project(&self, id: i64, finished_at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE projects SET finished = ? WHERE id = ?")
            .bind(finished_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownProject(id));
        }
        Ok(())
    }

    async fn append_step(&self, project_id: i64, command: &str) -> StoreResult<i64> {
        let result = sqlx::query("INSERT INTO steps (project_id, command) VALUES (?, ?)")
            .bind(project_id)
            .bind(command)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_projects(&self) -> StoreResult<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, name, directory, started, finished
            FROM projects
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_steps(&self, project_id: i64) -> StoreResult<Vec<StepRecord>> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, project_id, command
            FROM steps
            WHERE project_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_paths(&self) -> StoreResult<Vec<PathBinding>> {
        let rows = sqlx::query_as::<_, PathRow>("SELECT name, path FROM paths ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn bind_path(&self, name: &str, path: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO paths (name, path) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET path = excluded.path
            "#,
        )
        .bind(name)
        .bind(path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    name: String,
    directory: String,
    started: DateTime<Utc>,
    finished: Option<DateTime<Utc>>,
}

impl From<ProjectRow> for RunRecord {
    fn from(row: ProjectRow) -> Self {
        RunRecord {
            id: row.id,
            name: row.name,
            directory: row.directory,
            started_at: row.started,
            finished_at: row.finished,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: i64,
    project_id: i64,
    command: String,
}

impl From<StepRow> for StepRecord {
    fn from(row: StepRow) -> Self {
        StepRecord {
            id: row.id,
            project_id: row.project_id,
            command: row.command,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PathRow {
    name: String,
    path: String,
}

impl From<PathRow> for PathBinding {
    fn from(row: PathRow) -> Self {
        PathBinding {
            name: row.name,
            path: row.path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteHistoryStore {
        // A single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteHistoryStore::new(pool)
    }

    #[tokio::test]
    async fn test_project_lifecycle() {
        let store = store().await;
        let started = Utc::now();

        let id = store.create_project("run1", "/work/run1", started).await.unwrap();
        store.append_step(id, "mkdir run1").await.unwrap();
        store.append_step(id, "trimmer -i a.fq").await.unwrap();

        let projects = store.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "run1");
        assert_eq!(projects[0].directory, "/work/run1");
        assert!(projects[0].finished_at.is_none());

        store.finish_project(id, Utc::now()).await.unwrap();
        let projects = store.list_projects().await.unwrap();
        assert!(projects[0].finished_at.is_some());

        let histories = store.project_histories().await.unwrap();
        assert_eq!(histories[0].steps, ["mkdir run1", "trimmer -i a.fq"]);
    }

    #[tokio::test]
    async fn test_finish_unknown_project() {
        let store = store().await;
        assert!(matches!(
            store.finish_project(42, Utc::now()).await,
            Err(StoreError::UnknownProject(42))
        ));
    }

    #[tokio::test]
    async fn test_bind_path_replaces_previous_binding() {
        let store = store().await;
        store.bind_path("kraken", "/opt/kraken").await.unwrap();
        store.bind_path("bowtie2", "/opt/bowtie2").await.unwrap();
        store.bind_path("kraken", "/usr/local/bin/kraken2").await.unwrap();

        let paths = store.list_paths().await.unwrap();
        assert_eq!(
            paths,
            [
                PathBinding {
                    name: "bowtie2".to_string(),
                    path: "/opt/bowtie2".to_string()
                },
                PathBinding {
                    name: "kraken".to_string(),
                    path: "/usr/local/bin/kraken2".to_string()
                },
            ]
        );
    }
}
