//! Locating the launchable artifact after a successful acquisition
//!
//! Best-effort: absence of a candidate is never an error. The walk skips
//! tooling directories, drops executables that are clearly installers or
//! uninstallers, then prefers a display-name match, then conventional
//! program subdirectories, then simply the first candidate found.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory names never worth descending into
const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules"];

/// Subdirectory names where the main executable conventionally lives
const PREFERRED_DIRS: &[&str] = &["bin", "game", "games", "exe"];

/// Recursively search `root` for the primary launchable executable
///
/// `display_name` biases the choice toward an executable named after the
/// content itself.
pub fn find_launchable(root: &Path, display_name: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    collect_candidates(root, &mut candidates);
    if candidates.is_empty() {
        return None;
    }

    let wanted = normalize(display_name);
    if !wanted.is_empty() {
        for candidate in &candidates {
            let stem = candidate
                .file_stem()
                .map(|s| normalize(&s.to_string_lossy()))
                .unwrap_or_default();
            if !stem.is_empty() && (stem.contains(&wanted) || wanted.contains(&stem)) {
                debug!("launchable matched display name: {}", candidate.display());
                return Some(candidate.clone());
            }
        }
    }

    for candidate in &candidates {
        if in_preferred_dir(root, candidate) {
            debug!("launchable in preferred subdirectory: {}", candidate.display());
            return Some(candidate.clone());
        }
    }

    debug!("launchable fallback: {}", candidates[0].display());
    Some(candidates[0].clone())
}

/// Async wrapper for use from the task driver
pub async fn find_launchable_async(root: PathBuf, display_name: String) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || find_launchable(&root, &display_name))
        .await
        .unwrap_or(None)
}

/// Depth-first candidate collection in deterministic (sorted) walk order
fn collect_candidates(dir: &Path, out: &mut Vec<PathBuf>) {
    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.flatten().collect(),
        Err(_) => return, // unreadable subtree is simply not searched
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        if is_dir {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            collect_candidates(&path, out);
        } else if name.ends_with(".exe") && !is_excluded(&name) {
            out.push(path);
        }
    }
}

/// Executables that install, remove or wrap the content rather than being it
fn is_excluded(file_name: &str) -> bool {
    file_name.contains("uninstall")
        || file_name.contains("setup")
        || file_name.contains("installer")
        || (file_name.contains("launcher") && file_name.contains("steam"))
}

fn in_preferred_dir(root: &Path, candidate: &Path) -> bool {
    let relative = match candidate.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return false,
    };
    let Some(parent) = relative.parent() else {
        return false;
    };
    parent.components().any(|component| {
        let name = component.as_os_str().to_string_lossy().to_lowercase();
        PREFERRED_DIRS.contains(&name.as_str())
    })
}

/// Lowercased alphanumeric form used for name matching
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
