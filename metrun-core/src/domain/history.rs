//! Durable run history
//!
//! Records persisted by the controller's store and reported back to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One named execution of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub name: String,
    pub directory: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A step queued while a project was open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: i64,
    pub project_id: i64,
    pub command: String,
}

/// Resolved filesystem location of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathBinding {
    pub name: String,
    pub path: String,
}

/// A run record together with the commands it queued, in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectHistory {
    #[serde(flatten)]
    pub record: RunRecord,
    pub steps: Vec<String>,
}
