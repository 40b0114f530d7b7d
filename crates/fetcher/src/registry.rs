//! Task registry: the shared maps behind the engine
//!
//! The registry owns the only two globally shared mutable structures: the
//! active-task map and the transport-handle table. Both are keyed per task
//! and support atomic per-key read/update; different tasks' entries are
//! fully independent and no operation takes a lock across keys. The rest of
//! the system goes through this interface and never touches the maps
//! directly.

use chrono::Utc;
use dashmap::DashMap;
use std::path::Path;

use crate::core::error::{EngineError, Result};
use crate::core::{DownloadTask, TaskId, TaskStatus};
use crate::transport::TransportHandle;

#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, DownloadTask>,
    handles: DashMap<TaskId, TransportHandle>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new task; the target directory must not belong to another
    /// active task
    pub fn insert(&self, task: DownloadTask) -> Result<()> {
        if self.target_dir_in_use(&task.target_dir) {
            return Err(EngineError::Submit {
                reason: format!(
                    "destination '{}' is already owned by an active task",
                    task.target_dir.display()
                ),
            });
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.get(id).map(|entry| entry.clone())
    }

    /// Snapshot of all active tasks, for reconciliation after observer gaps
    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.tasks.iter().map(|entry| entry.clone()).collect()
    }

    pub fn target_dir_in_use(&self, dir: &Path) -> bool {
        self.tasks.iter().any(|entry| entry.target_dir == dir)
    }

    /// Atomically mutate one task record, returning the updated copy
    ///
    /// Terminal records are never mutated: a late progress callback racing a
    /// cancellation must not resurrect the task.
    pub fn update<F>(&self, id: &str, mutate: F) -> Option<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask),
    {
        let mut entry = self.tasks.get_mut(id)?;
        if entry.status.is_terminal() {
            return None;
        }
        mutate(&mut entry);
        Some(entry.clone())
    }

    /// Flag a task cancelled, stamping its end time
    ///
    /// This happens before any resource teardown so that concurrent
    /// completion callbacks observe the cancellation and suppress their own
    /// terminal commit. The entry stays in the map until `evict` so the
    /// cleanup phase can still read it.
    pub fn mark_cancelled(&self, id: &str) -> Result<DownloadTask> {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::CancellationRace { id: id.to_string() })?;
        if entry.status.is_terminal() {
            return Err(EngineError::CancellationRace { id: id.to_string() });
        }
        entry.status = TaskStatus::Cancelled;
        entry.finished_at = Some(Utc::now());
        Ok(entry.clone())
    }

    /// Atomically commit a driver-side terminal state and remove the task
    ///
    /// Returns `None` when the task is gone or already terminal (a
    /// cancellation won the race); the caller must then leave history alone.
    pub fn commit_terminal(
        &self,
        id: &str,
        status: TaskStatus,
        progress: u8,
        error: Option<String>,
    ) -> Option<DownloadTask> {
        debug_assert!(status.is_terminal());
        let removed = self
            .tasks
            .remove_if(id, |_, task| !task.status.is_terminal());
        removed.map(|(_, mut task)| {
            task.status = status;
            task.progress = progress;
            task.error = error;
            task.finished_at = Some(Utc::now());
            task
        })
    }

    /// Remove an already-terminal task (the cancellation path's eviction)
    pub fn evict(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.remove(id).map(|(_, task)| task)
    }

    /// Register the live transport handle for a task, replacing any previous
    /// one (the helper re-route swaps the direct handle for the helper's)
    pub fn register_handle(&self, id: &str, handle: TransportHandle) {
        self.handles.insert(id.to_string(), handle);
    }

    /// Take the live handle out of the table, if any
    pub fn take_handle(&self, id: &str) -> Option<TransportHandle> {
        self.handles.remove(id).map(|(_, handle)| handle)
    }

    /// Drop the handle of a task that finished on its own
    pub fn clear_handle(&self, id: &str) {
        self.handles.remove(id);
    }
}
