//! The download engine facade
//!
//! `DownloadEngine` is the entry point callers interact with: submit a task,
//! watch progress, cancel, read history. It wires the resolver, the
//! transport set, the task registry and the history store together and is
//! the single place where terminal states are reconciled.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cleanup;
use crate::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::{
    sanitize_name, DownloadTask, ProgressBus, ProgressUpdate, TaskId, TaskRequest, TaskStatus,
    TransportEvent,
};
use crate::history::{HistoryEntry, HistoryStore};
use crate::registry::TaskRegistry;
use crate::resolver::SourceResolver;
use crate::runner;
use crate::transport::{DirectTransport, HelperTransport, SwarmTransport, TransportSet};

/// A directory under the download root that holds a launchable artifact
#[derive(Debug, Clone, Serialize)]
pub struct InstalledContent {
    pub name: String,
    pub path: PathBuf,
    pub launchable: PathBuf,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) history: HistoryStore,
    pub(crate) bus: ProgressBus,
    pub(crate) resolver: SourceResolver,
    pub(crate) transports: TransportSet,
}

/// Multi-protocol, concurrent download orchestration engine
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

impl DownloadEngine {
    /// Build an engine, creating its directories and loading history
    pub fn new(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.download_dir).map_err(|source| {
            EngineError::Filesystem {
                path: config.download_dir.clone(),
                source,
            }
        })?;
        std::fs::create_dir_all(&config.state_dir).map_err(|source| EngineError::Filesystem {
            path: config.state_dir.clone(),
            source,
        })?;

        let history = HistoryStore::load(config.history_path(), config.history_limit);
        let resolver = SourceResolver::new(&config)?;
        // Evaluated in order; the helper is the catch-all and must stay last.
        let transports = TransportSet::new()
            .register(SwarmTransport::new(&config))
            .register(DirectTransport::new(&config)?)
            .register(HelperTransport::new(&config));

        Ok(Self {
            inner: Arc::new(EngineInner {
                bus: ProgressBus::new(config.progress_capacity),
                registry: Arc::new(TaskRegistry::new()),
                history,
                resolver,
                transports,
                config,
            }),
        })
    }

    /// Submit a new acquisition; returns the task id before any transfer
    /// starts
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        if request.reference.trim().is_empty() {
            return Err(EngineError::Submit {
                reason: "empty resource reference".to_string(),
            });
        }
        let dir_name = sanitize_name(&request.display_name);
        if dir_name.is_empty() {
            return Err(EngineError::Submit {
                reason: "display name yields no usable directory name".to_string(),
            });
        }

        let id: TaskId = uuid::Uuid::new_v4().to_string();
        let target_dir = self.inner.config.download_dir.join(dir_name);
        let task = DownloadTask::new(id.clone(), &request, target_dir.clone());

        self.inner.registry.insert(task.clone())?;
        if let Err(source) = tokio::fs::create_dir_all(&target_dir).await {
            self.inner.registry.evict(&id);
            return Err(EngineError::Filesystem {
                path: target_dir,
                source,
            });
        }

        info!("accepted task {} for '{}'", id, task.display_name);
        self.inner.emit_task(&task);
        tokio::spawn(runner::drive(Arc::clone(&self.inner), id.clone()));
        Ok(id)
    }

    /// Cancel an active task: tear down its transport, clean up its
    /// destination directory and record the terminal outcome
    ///
    /// Idempotent in effect: a second cancel, or a cancel against a terminal
    /// or unknown id, returns `CancellationRace` and appends nothing.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        // Flag first, before touching any resource, so a concurrent
        // completion observes the cancellation and suppresses itself.
        let task = self.inner.registry.mark_cancelled(id)?;
        info!("cancelling task {} ('{}')", id, task.display_name);

        if let Some(handle) = self.inner.registry.take_handle(id) {
            handle.teardown().await;
        }

        // Let the OS release file locks held by the torn-down transport.
        tokio::time::sleep(self.inner.config.cancel_grace).await;

        let removed =
            cleanup::remove_dir_resilient(&task.target_dir, &self.inner.config.cleanup_retry)
                .await;
        if !removed {
            warn!(
                "destination {} not fully removed after cancellation",
                task.target_dir.display()
            );
        }

        let registry = Arc::clone(&self.inner.registry);
        let committed = self
            .inner
            .history
            .commit_terminal(|| registry.evict(id))
            .await;
        if let Some(task) = committed {
            self.inner.bus.emit(ProgressUpdate {
                id: task.id.clone(),
                status: TaskStatus::Cancelled,
                progress: task.progress,
                message: Some("cancelled".to_string()),
            });
        }
        Ok(())
    }

    /// Subscribe to the ordered per-task progress events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.inner.bus.subscribe()
    }

    /// Snapshot of all active tasks
    pub fn active(&self) -> Vec<DownloadTask> {
        self.inner.registry.snapshot()
    }

    /// One active task by id
    pub fn task(&self, id: &str) -> Option<DownloadTask> {
        self.inner.registry.get(id)
    }

    /// Terminal outcomes, newest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.list().await
    }

    /// Remove one history entry by id
    pub async fn remove_history(&self, id: &str) -> Result<()> {
        self.inner.history.remove(id).await
    }

    /// True when a directory for `name` exists and holds a launchable
    pub async fn is_installed(&self, name: &str) -> bool {
        let dir = self.inner.config.download_dir.join(sanitize_name(name));
        if !dir.exists() {
            return false;
        }
        crate::artifact::find_launchable_async(dir, name.to_string())
            .await
            .is_some()
    }

    /// Every directory under the download root with a launchable artifact
    pub async fn installed(&self) -> Vec<InstalledContent> {
        let mut result = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.inner.config.download_dir).await {
            Ok(entries) => entries,
            Err(_) => return result,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(launchable) =
                crate::artifact::find_launchable_async(entry.path(), name.clone()).await
            {
                result.push(InstalledContent {
                    name,
                    path: entry.path(),
                    launchable,
                });
            }
        }
        result
    }

    /// Remove installed content by name
    ///
    /// Refused while an active task owns the directory.
    pub async fn uninstall(&self, name: &str) -> Result<()> {
        let dir = self.inner.config.download_dir.join(sanitize_name(name));
        if !dir.exists() {
            return Err(EngineError::NotInstalled {
                name: name.to_string(),
            });
        }
        if self.inner.registry.target_dir_in_use(&dir) {
            return Err(EngineError::Submit {
                reason: format!("'{}' is being written by an active task", name),
            });
        }
        if !cleanup::remove_dir_resilient(&dir, &self.inner.config.cleanup_retry).await {
            return Err(EngineError::Filesystem {
                path: dir,
                source: std::io::Error::other("directory could not be fully removed"),
            });
        }
        info!("uninstalled '{}'", name);
        Ok(())
    }
}

impl EngineInner {
    /// Transition a task and emit the corresponding progress event
    pub(crate) fn set_status(
        &self,
        id: &str,
        status: TaskStatus,
        progress: u8,
        message: Option<String>,
    ) {
        let updated = self.registry.update(id, |task| {
            task.status = status;
            task.progress = progress;
            if message.is_some() {
                task.message = message.clone();
            }
        });
        if let Some(task) = updated {
            self.emit_task(&task);
        }
    }

    /// Fold a transport's raw progress into the task record and broadcast it
    pub(crate) fn transport_progress(&self, id: &str, event: TransportEvent) {
        let updated = self.registry.update(id, |task| {
            if let Some(percent) = event.percent {
                task.progress = percent;
            }
            if let Some(message) = event.message.clone() {
                task.message = Some(message);
            }
        });
        if let Some(task) = updated {
            self.emit_task(&task);
        }
    }

    pub(crate) fn emit_task(&self, task: &DownloadTask) {
        self.bus.emit(ProgressUpdate {
            id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
        });
    }

    /// Terminal commit for a successful task
    pub(crate) async fn finish_success(&self, id: &str, launchable: Option<PathBuf>) {
        if let Some(path) = &launchable {
            self.registry.update(id, |task| {
                task.message = Some(format!("launchable artifact: {}", path.display()));
            });
        }
        self.registry.clear_handle(id);
        let registry = Arc::clone(&self.registry);
        let id_owned = id.to_string();
        let committed = self
            .history
            .commit_terminal(move || {
                registry.commit_terminal(&id_owned, TaskStatus::Completed, 100, None)
            })
            .await;
        match committed {
            Some(task) => {
                info!("task {} completed ('{}')", id, task.display_name);
                self.emit_task(&task);
            }
            None => debug!("task {} already terminal, completion suppressed", id),
        }
    }

    /// Terminal commit for a failed task
    pub(crate) async fn finish_error(&self, id: &str, error: EngineError) {
        warn!("task {} failed ({}): {}", id, error.category(), error);
        self.registry.clear_handle(id);
        let message = error.to_string();
        let registry = Arc::clone(&self.registry);
        let id_owned = id.to_string();
        let committed = self
            .history
            .commit_terminal(move || {
                registry.commit_terminal(&id_owned, TaskStatus::Error, 0, Some(message))
            })
            .await;
        match committed {
            Some(task) => self.bus.emit(ProgressUpdate {
                id: task.id.clone(),
                status: TaskStatus::Error,
                progress: 0,
                message: task.error.clone(),
            }),
            None => debug!("task {} already terminal, error suppressed", id),
        }
    }
}
