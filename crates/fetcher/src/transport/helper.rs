//! External helper transport
//!
//! Delegates acquisition to a sandboxed helper process for sources that
//! require scripted interaction with a hosting page. The helper is a black
//! box beyond its invocation contract:
//!
//! ```text
//! helper <url> <destDir> <correlationId> <stateDir>
//! ```
//!
//! It emits one self-describing JSON status record per stdout line; exit
//! code 0 means success. Malformed status lines are ignored — progress from
//! the helper is best-effort only.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::{TransportEvent, TransportKind};
use crate::resolver::ResolvedSource;

use super::{AcquireContext, Acquisition, Transport, TransportHandle};

/// One status record on the helper's stdout
#[derive(Debug, Deserialize)]
struct HelperStatus {
    progress: Option<u8>,
    message: Option<String>,
}

pub struct HelperTransport {
    command: PathBuf,
    state_dir: PathBuf,
}

impl HelperTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            command: config.helper_command.clone(),
            state_dir: config.state_dir.clone(),
        }
    }
}

#[async_trait]
impl Transport for HelperTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Helper
    }

    /// Catch-all: anything no other strategy claims goes through the helper
    fn claims(&self, _resolved: &ResolvedSource) -> bool {
        true
    }

    async fn acquire(&self, ctx: &AcquireContext) -> Result<Acquisition> {
        let terminate = CancellationToken::new();
        ctx.registry.register_handle(
            &ctx.task_id,
            TransportHandle::Helper {
                terminate: terminate.clone(),
            },
        );

        debug!(
            "helper acquisition of {} into {} (correlation {})",
            ctx.resolved.url,
            ctx.dest_dir.display(),
            ctx.task_id
        );

        let mut child = Command::new(&self.command)
            .arg(&ctx.resolved.url)
            .arg(&ctx.dest_dir)
            .arg(&ctx.task_id)
            .arg(&self.state_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                EngineError::transport(
                    format!("launching helper '{}'", self.command.display()),
                    err,
                )
            })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        // Drain stderr concurrently so the helper can never block on it
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("helper: {}", line);
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_progress: u8 = 0;
        let mut last_message: Option<String> = None;

        let status = loop {
            tokio::select! {
                _ = terminate.cancelled() => {
                    if let Err(err) = child.start_kill() {
                        warn!("could not kill helper process: {}", err);
                    }
                    let _ = child.wait().await;
                    return Err(EngineError::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        merge_status(&line, &mut last_progress, &mut last_message);
                        (ctx.on_progress)(TransportEvent {
                            percent: Some(last_progress),
                            message: last_message.clone(),
                        });
                    }
                    // stdout closed; wait for the exit code
                    Ok(None) => break child.wait().await,
                    Err(err) => {
                        warn!("helper stdout read failed: {}", err);
                        break child.wait().await;
                    }
                },
            }
        };

        let status = status
            .map_err(|err| EngineError::transport("waiting for helper exit", err))?;
        if !status.success() {
            return Err(EngineError::transport_msg(format!(
                "running helper for '{}' (exit code {})",
                ctx.resolved.url,
                status.code().unwrap_or(-1)
            )));
        }

        // A zero exit either left the expected archive behind, or the helper
        // already produced the final output tree.
        match find_archive(&ctx.dest_dir).await {
            Some(archive) => Ok(Acquisition::Archive(archive)),
            None => Ok(Acquisition::InPlace),
        }
    }
}

/// Parse one status line, merging into the last-known progress/message pair;
/// anything unparseable is ignored
fn merge_status(line: &str, last_progress: &mut u8, last_message: &mut Option<String>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<HelperStatus>(line) {
        Ok(status) => {
            if let Some(progress) = status.progress {
                *last_progress = progress.min(100);
            }
            if let Some(message) = status.message {
                *last_message = Some(message);
            }
        }
        Err(_) => debug!("ignoring non-status helper output: {}", line),
    }
}

/// Locate the one archive the helper is expected to leave in the destination
async fn find_archive(dest_dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            return Some(entry.path());
        }
    }
    None
}
