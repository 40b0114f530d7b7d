//! Persistent history of terminal download outcomes
//!
//! A bounded, newest-first list of frozen task snapshots, serialized to disk
//! on every mutation and reloaded at startup. Absence or corruption of the
//! file is non-fatal and resets history to empty. The store's lock doubles
//! as the terminal commit point for the engine (see `DownloadEngine`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::error::{EngineError, Result};
use crate::core::{DownloadTask, TaskId, TaskStatus};

/// A frozen snapshot of a task at the moment it became terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: TaskId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    pub status: TaskStatus,
    pub target_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    fn from_task(task: &DownloadTask) -> Self {
        Self {
            id: task.id.clone(),
            display_name: task.display_name.clone(),
            catalog_id: task.catalog_id.clone(),
            status: task.status,
            target_dir: task.target_dir.clone(),
            started_at: task.started_at,
            finished_at: task.finished_at.unwrap_or_else(Utc::now),
            error: task.error.clone(),
        }
    }
}

/// Append-only bounded store of terminal outcomes, newest first
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryStore {
    /// Load the store from `path`, tolerating a missing or corrupt file
    pub fn load(path: PathBuf, limit: usize) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
                Ok(mut list) => {
                    list.truncate(limit);
                    debug!("loaded {} history entries", list.len());
                    list
                }
                Err(err) => {
                    warn!("history file {} is corrupt, resetting: {}", path.display(), err);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            limit,
            entries: Mutex::new(entries),
        }
    }

    /// Record a terminal task, evicting the oldest entry beyond the cap
    pub async fn record(&self, task: &DownloadTask) {
        let mut entries = self.entries.lock().await;
        entries.insert(0, HistoryEntry::from_task(task));
        while entries.len() > self.limit {
            entries.pop();
        }
        self.persist(&entries).await;
    }

    /// Newest-first copy of the retained entries
    pub async fn list(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.clone()
    }

    /// Remove one entry by id
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Err(EngineError::CancellationRace { id: id.to_string() });
        }
        self.persist(&entries).await;
        Ok(())
    }

    /// Run `commit` while holding the store's lock, then append and persist
    ///
    /// This is the engine's atomic terminal commit: registry eviction happens
    /// inside `commit`, under the same lock that guards the history list, so
    /// no observer sees a task in neither or both places.
    pub async fn commit_terminal<F>(&self, commit: F) -> Option<DownloadTask>
    where
        F: FnOnce() -> Option<DownloadTask>,
    {
        let mut entries = self.entries.lock().await;
        let task = commit()?;
        entries.insert(0, HistoryEntry::from_task(&task));
        while entries.len() > self.limit {
            entries.pop();
        }
        self.persist(&entries).await;
        Some(task)
    }

    /// Write the list to disk; persistence failure is logged, never fatal
    async fn persist(&self, entries: &[HistoryEntry]) {
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_vec_pretty(entries) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&self.path, bytes).await {
                    warn!("could not persist history to {}: {}", self.path.display(), err);
                }
            }
            Err(err) => warn!("could not serialize history: {}", err),
        }
    }
}
