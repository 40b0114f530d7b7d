//! Core types used throughout the download engine
//!
//! This module contains the fundamental types that all other modules depend
//! on: the task record, its status machine, and the submission request.

pub mod error;
pub mod progress;
pub mod validation;

// Re-export main types for convenience
pub use error::{EngineError, MismatchKind, Result};
pub use progress::{ProgressBus, ProgressUpdate, TransportCallback, TransportEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque task identifier, assigned at submission and never reused
pub type TaskId = String;

/// Lifecycle states of a download task
///
/// `Starting` is the single initial state; `Completed`, `Error` and
/// `Cancelled` are terminal and mutually exclusive. The three downloading
/// states are alternatives chosen by transport resolution, with one sideways
/// edge: `Downloading` can re-route to `DownloadingViaHelper` when a direct
/// link turns out to serve a hosting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Starting,
    ResolvingUrl,
    Downloading,
    DownloadingSwarm,
    DownloadingViaHelper,
    Validating,
    Extracting,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    /// True once no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// Total ordering of states for monotonicity checks
    ///
    /// The three downloading states share a rank: they are alternatives, not
    /// a sequence, and the sideways helper re-route must not count as a
    /// regression.
    pub fn rank(&self) -> u8 {
        match self {
            TaskStatus::Starting => 0,
            TaskStatus::ResolvingUrl => 1,
            TaskStatus::Downloading
            | TaskStatus::DownloadingSwarm
            | TaskStatus::DownloadingViaHelper => 2,
            TaskStatus::Validating => 3,
            TaskStatus::Extracting => 4,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled => 5,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Starting => "starting",
            TaskStatus::ResolvingUrl => "resolving-url",
            TaskStatus::Downloading => "downloading",
            TaskStatus::DownloadingSwarm => "downloading-swarm",
            TaskStatus::DownloadingViaHelper => "downloading-via-helper",
            TaskStatus::Validating => "validating",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Which acquisition mechanism a task ended up using
///
/// Fixed once resolution picks a transport; the helper re-route updates it
/// exactly once, before the helper starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Direct,
    Swarm,
    Helper,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Swarm => write!(f, "swarm"),
            TransportKind::Helper => write!(f, "helper"),
        }
    }
}

/// The central entity: one in-flight acquisition-and-extraction request
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    /// Opaque unique identifier
    pub id: TaskId,
    /// Human-facing name, also the destination-naming hint
    pub display_name: String,
    /// Catalog-level identifier carried through to history
    pub catalog_id: Option<String>,
    /// The reference as submitted (URL or peer-to-peer identifier)
    pub reference: String,
    /// Filesystem location owned exclusively by this task until terminal
    pub target_dir: PathBuf,
    pub status: TaskStatus,
    /// 0-100, monotonic within a state; state transitions may reset it
    pub progress: u8,
    /// Last-write-wins human-readable detail
    pub message: Option<String>,
    /// Fixed once resolved
    pub transport: Option<TransportKind>,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, on reaching a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Present only in the Error terminal state
    pub error: Option<String>,
}

impl DownloadTask {
    pub(crate) fn new(
        id: TaskId,
        request: &TaskRequest,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            id,
            display_name: request.display_name.clone(),
            catalog_id: request.catalog_id.clone(),
            reference: request.reference.clone(),
            target_dir,
            status: TaskStatus::Starting,
            progress: 0,
            message: None,
            transport: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}

/// A task submission: a resource reference plus a destination-naming hint
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// URL or peer-to-peer identifier to acquire
    pub reference: String,
    /// Display name; the destination directory derives from it
    pub display_name: String,
    /// Optional catalog identifier, recorded in history
    pub catalog_id: Option<String>,
}

impl TaskRequest {
    pub fn new<R: Into<String>, N: Into<String>>(reference: R, display_name: N) -> Self {
        Self {
            reference: reference.into(),
            display_name: display_name.into(),
            catalog_id: None,
        }
    }

    pub fn with_catalog_id<S: Into<String>>(mut self, catalog_id: S) -> Self {
        self.catalog_id = Some(catalog_id.into());
        self
    }
}

/// Replace characters that are unsafe in directory names
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
