//! Queue types
//!
//! `QueueEntry` is the controller-side record of a step awaiting dispatch.
//! `QueueItem` is the flattened view returned by the `queue` request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete command waiting for dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub pid: u64,
    pub argv: Vec<String>,
}

impl QueueEntry {
    /// Name of the tool, i.e. the first argv element
    pub fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// Position of an item in the `queue` listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Running,
    Waiting,
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueItemStatus::Running => f.write_str("running"),
            QueueItemStatus::Waiting => f.write_str("waiting"),
        }
    }
}

/// One `name:status` pair of the `queue` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub name: String,
    pub status: QueueItemStatus,
}

impl QueueItem {
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: QueueItemStatus::Running,
        }
    }

    pub fn waiting(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: QueueItemStatus::Waiting,
        }
    }

    /// Formats a listing as pipe-separated `name:status` pairs
    ///
    /// An empty listing is rendered as the none-marker.
    pub fn format_list(items: &[QueueItem]) -> String {
        if items.is_empty() {
            return crate::protocol::NONE_MARKER.to_string();
        }
        items
            .iter()
            .map(|item| format!("{}:{}", item.name, item.status))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Parses a `queue` reply back into items
    ///
    /// Pairs with an unknown status are skipped.
    pub fn parse_list(reply: &str) -> Vec<QueueItem> {
        let reply = reply.trim();
        if reply.is_empty() || reply == crate::protocol::NONE_MARKER {
            return Vec::new();
        }

        reply
            .split('|')
            .filter_map(|pair| {
                let (name, status) = pair.rsplit_once(':')?;
                let status = match status {
                    "running" => QueueItemStatus::Running,
                    "waiting" => QueueItemStatus::Waiting,
                    _ => return None,
                };
                Some(QueueItem {
                    name: name.to_string(),
                    status,
                })
            })
            .collect()
    }
}
