//! Artifact validation shared by the direct and helper transports
//!
//! A transport only guarantees that bytes arrived; this module decides
//! whether those bytes are the archive the task asked for, and if not,
//! classifies what actually came back so the error names the mismatch.

use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::error::{EngineError, MismatchKind, Result};

/// Leading bytes of the supported archive container
pub const ARCHIVE_MAGIC: [u8; 2] = [0x50, 0x4B]; // "PK"

/// How many leading bytes to read for signature sniffing
const SNIFF_LEN: usize = 100;

/// Declared content types that mean "human-facing page, not an artifact"
pub fn is_markup_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

/// Validate that the file at `path` is the expected archive
///
/// Returns `Ok(())` when the magic signature matches. Any other outcome is a
/// `ValidationMismatch` whose kind and detail name what was detected, with
/// the originating URL embedded so the caller can explain the failure.
pub async fn validate_archive(path: &Path, url: &str) -> Result<()> {
    let meta = fs::metadata(path)
        .await
        .map_err(|source| EngineError::Filesystem {
            path: path.to_path_buf(),
            source,
        })?;

    if meta.len() == 0 {
        return Err(EngineError::ValidationMismatch {
            kind: MismatchKind::Empty,
            url: url.to_string(),
            detail: "the downloaded file is empty".to_string(),
        });
    }

    let mut file = fs::File::open(path)
        .await
        .map_err(|source| EngineError::Filesystem {
            path: path.to_path_buf(),
            source,
        })?;
    let mut head = vec![0u8; SNIFF_LEN.min(meta.len() as usize)];
    file.read_exact(&mut head)
        .await
        .map_err(|source| EngineError::Filesystem {
            path: path.to_path_buf(),
            source,
        })?;

    match classify_prefix(&head) {
        None => {
            debug!("archive signature accepted for {}", path.display());
            Ok(())
        }
        Some((kind, detail)) => Err(EngineError::ValidationMismatch {
            kind,
            url: url.to_string(),
            detail,
        }),
    }
}

/// Classify the leading bytes of an artifact
///
/// `None` means the archive signature matched; otherwise the mismatch kind
/// plus a human-readable detail.
pub fn classify_prefix(head: &[u8]) -> Option<(MismatchKind, String)> {
    if head.is_empty() {
        return Some((MismatchKind::Empty, "the downloaded file is empty".into()));
    }
    if head.len() >= 2 && head[0] == ARCHIVE_MAGIC[0] && head[1] == ARCHIVE_MAGIC[1] {
        return None;
    }

    let text = String::from_utf8_lossy(head);
    let lower = text.to_ascii_lowercase();
    let trimmed = lower.trim_start();

    if trimmed.starts_with('<')
        || lower.contains("<!doctype")
        || lower.contains("<html")
        || lower.contains("<body")
    {
        return Some((
            MismatchKind::MarkupPage,
            "the link serves a markup page instead of an archive; the source likely requires scripted interaction or authentication".into(),
        ));
    }

    if text.contains("d8:announce") || text.contains("magnet:") {
        return Some((
            MismatchKind::TorrentDescriptor,
            "received a torrent descriptor, not an archive; the reference should go through the swarm transport".into(),
        ));
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some((
            MismatchKind::StructuredError,
            "the server returned a structured error body instead of an archive".into(),
        ));
    }

    let shown = &head[..head.len().min(4)];
    Some((
        MismatchKind::Unrecognized,
        format!("leading bytes {} match no known signature", hex::encode(shown)),
    ))
}
