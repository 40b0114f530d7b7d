//! Streaming extraction of the supported archive container
//!
//! The container's central directory gives the entry total up front; entries
//! then stream to disk one at a time, with a progress callback after each
//! completed entry. Failure on any single entry aborts the whole extraction;
//! partial output is not rolled back here (the caller owns cleanup).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::core::error::{EngineError, Result};

/// Extract `archive` into `dest`, invoking `on_progress(percent)` after each
/// entry completes
///
/// Blocking; callers run it under `spawn_blocking`. Returns the number of
/// entries written. Directory entries are created without content; parent
/// directories are created on demand. Entry names are resolved through the
/// container's sanitized form, so hostile names cannot escape `dest`.
pub fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    on_progress: &dyn Fn(u8),
) -> Result<usize> {
    let file = File::open(archive_path).map_err(|source| EngineError::Filesystem {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|source| EngineError::Extraction {
            archive: archive_path.to_path_buf(),
            source: Box::new(source),
        })?;

    let total = archive.len();
    debug!(
        "extracting {} entries from {} into {}",
        total,
        archive_path.display(),
        dest.display()
    );

    let mut written = 0usize;
    for index in 0..total {
        let mut entry = archive
            .by_index(index)
            .map_err(|source| EngineError::Extraction {
                archive: archive_path.to_path_buf(),
                source: Box::new(source),
            })?;

        let relative: PathBuf = match entry.enclosed_name() {
            Some(name) => name,
            None => {
                // Hostile or unrepresentable name; count it but write nothing
                written += 1;
                on_progress(percent_of(written, total));
                continue;
            }
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| EngineError::Filesystem {
                path: out_path.clone(),
                source,
            })?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| EngineError::Filesystem {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let mut out = File::create(&out_path).map_err(|source| EngineError::Filesystem {
                path: out_path.clone(),
                source,
            })?;
            std::io::copy(&mut entry, &mut out).map_err(|source| EngineError::Extraction {
                archive: archive_path.to_path_buf(),
                source: Box::new(source),
            })?;
        }

        written += 1;
        on_progress(percent_of(written, total));
    }

    Ok(written)
}

/// Async wrapper running the blocking extraction on the blocking pool
pub async fn extract(
    archive_path: PathBuf,
    dest: PathBuf,
    on_progress: Arc<dyn Fn(u8) + Send + Sync>,
) -> Result<usize> {
    tokio::task::spawn_blocking(move || {
        extract_archive(&archive_path, &dest, on_progress.as_ref())
    })
    .await
    .map_err(|join| EngineError::Extraction {
        archive: PathBuf::new(),
        source: Box::new(join),
    })?
}

fn percent_of(written: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((written * 100) / total) as u8
}
