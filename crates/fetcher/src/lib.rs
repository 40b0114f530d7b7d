//! Fetcher
//!
//! A multi-protocol, concurrent download orchestration engine: give it a
//! resource reference — a direct archive link, a link that resolves through
//! redirect or consent pages, a magnet/torrent reference, or a link that
//! needs scripted interaction with a hosting page — and it acquires the
//! resource, validates it, extracts it when it is an archive, and reports
//! granular per-task progress, with safe mid-flight cancellation and a
//! persistent history of outcomes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fetcher::{DownloadEngine, EngineConfig, TaskRequest};
//!
//! # async fn example() -> fetcher::Result<()> {
//! let engine = DownloadEngine::new(EngineConfig::from_env())?;
//! let mut events = engine.subscribe();
//!
//! let id = engine
//!     .submit(TaskRequest::new("https://example.com/content.zip", "Content"))
//!     .await?;
//!
//! while let Ok(update) = events.recv().await {
//!     if update.id != id {
//!         continue;
//!     }
//!     println!("{}: {}%", update.status, update.progress);
//!     if update.status.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Source resolver** walks redirect chains with metadata-only probes and
//!   classifies the hosting service against a fixed marker table.
//! - **Transport strategies** — direct HTTP stream, peer-to-peer swarm, and
//!   a sandboxed external helper process — share one trait and are selected
//!   from an ordered set; a direct stream that hits a hosting page re-routes
//!   to the helper instead of failing.
//! - **Task registry and per-task drivers** hold the only shared mutable
//!   state behind per-key atomic maps and emit every transition on a
//!   broadcast progress channel.
//! - **Cancellation** tears down whichever transport is in flight, then
//!   removes the task's directory with a bounded-retry, lock-tolerant sweep.
//! - **History** keeps a bounded, persisted log of terminal outcomes.

pub mod artifact;
pub mod cleanup;
pub mod config;
pub mod core;
pub mod engine;
pub mod extract;
pub mod history;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod transport;

mod runner;

// Re-export commonly used types for convenience
pub use crate::config::EngineConfig;
pub use crate::core::{
    DownloadTask, EngineError, MismatchKind, ProgressUpdate, Result, TaskId, TaskRequest,
    TaskStatus, TransportKind,
};
pub use crate::engine::{DownloadEngine, InstalledContent};
pub use crate::history::HistoryEntry;
pub use crate::resolver::ResolvedSource;
pub use crate::retry::RetryPolicy;

#[cfg(test)]
mod tests;
