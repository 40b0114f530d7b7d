//! Resilient recursive deletion of task directories
//!
//! Transports can leave files briefly locked after teardown, so bulk
//! deletion is retried, and a manual file-by-file sweep that tolerates
//! individual locked files is the last resort. Failures here are logged and
//! never escalate: cleanup must not change a cancellation's outcome.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Delete `dir` recursively, retrying per `policy`, then falling back to a
/// manual per-file sweep
///
/// Returns true when the directory is fully gone.
pub async fn remove_dir_resilient(dir: &Path, policy: &RetryPolicy) -> bool {
    if !dir.exists() {
        return true;
    }

    let bulk = policy
        .run(|| async { tokio::fs::remove_dir_all(dir).await })
        .await;

    match bulk {
        Ok(()) => {
            debug!("removed directory {}", dir.display());
            true
        }
        Err(err) => {
            warn!(
                "bulk removal of {} failed after retries: {}; sweeping file by file",
                dir.display(),
                err
            );
            let target = dir.to_path_buf();
            let swept = tokio::task::spawn_blocking(move || sweep_dir(&target))
                .await
                .unwrap_or(false);
            if !swept {
                warn!("could not fully remove {}", dir.display());
            }
            swept
        }
    }
}

/// Depth-first manual delete that skips over locked entries
fn sweep_dir(dir: &Path) -> bool {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot read {}: {}", dir.display(), err);
            return false;
        }
    };

    for entry in entries.flatten() {
        let path: PathBuf = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            sweep_dir(&path);
        } else if let Err(err) = std::fs::remove_file(&path) {
            warn!("cannot remove {}: {}", path.display(), err);
        }
    }

    match std::fs::remove_dir(dir) {
        Ok(()) => true,
        Err(err) => {
            warn!("cannot remove directory {}: {}", dir.display(), err);
            false
        }
    }
}
