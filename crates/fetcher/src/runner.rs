//! Per-task driver: walks one task through its lifecycle
//!
//! Each submitted task gets one spawned driver that owns the task's state
//! machine from resolution to a terminal state. Errors never escape the
//! driver: they become the task's terminal `Error` state. A cancellation
//! observed anywhere makes the driver stand down and leave the terminal
//! commit to the cancellation path.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::artifact;
use crate::core::error::{EngineError, Result};
use crate::core::validation::validate_archive;
use crate::core::{TaskId, TaskStatus, TransportCallback, TransportEvent, TransportKind};
use crate::engine::EngineInner;
use crate::extract;
use crate::resolver::{is_peer_reference, ResolvedSource};
use crate::transport::{AcquireContext, Acquisition};

/// Status a transport's kind maps to while it runs
fn downloading_status(kind: TransportKind) -> TaskStatus {
    match kind {
        TransportKind::Direct => TaskStatus::Downloading,
        TransportKind::Swarm => TaskStatus::DownloadingSwarm,
        TransportKind::Helper => TaskStatus::DownloadingViaHelper,
    }
}

pub(crate) async fn drive(inner: Arc<EngineInner>, task_id: TaskId) {
    match run(&inner, &task_id).await {
        Ok(launchable) => inner.finish_success(&task_id, launchable).await,
        Err(err) if err.is_cancelled() => {
            // The cancellation controller owns the terminal commit.
            debug!("task {} stood down after cancellation", task_id);
        }
        Err(err) => inner.finish_error(&task_id, err).await,
    }
}

async fn run(inner: &Arc<EngineInner>, task_id: &TaskId) -> Result<Option<PathBuf>> {
    let task = inner
        .registry
        .get(task_id)
        .ok_or(EngineError::Cancelled)?;

    inner.set_status(task_id, TaskStatus::ResolvingUrl, 0, None);
    // Peer-to-peer references go straight to the swarm; only HTTP resources
    // have a redirect chain worth walking.
    let resolved = if is_peer_reference(&task.reference) {
        ResolvedSource {
            url: task.reference.clone(),
            service: None,
        }
    } else {
        inner.resolver.resolve(&task.reference).await
    };
    debug!(
        "task {} resolved to {} (service: {:?})",
        task_id, resolved.url, resolved.service
    );

    let transport = inner.transports.select(&resolved);
    let kind = transport.kind();
    inner.registry.update(task_id, |t| t.transport = Some(kind));
    inner.set_status(
        task_id,
        downloading_status(kind),
        0,
        resolved.service.map(|s| format!("downloading via {}", s)),
    );

    let ctx = AcquireContext {
        task_id: task_id.clone(),
        resolved: resolved.clone(),
        dest_dir: task.target_dir.clone(),
        display_name: task.display_name.clone(),
        registry: Arc::clone(&inner.registry),
        on_progress: progress_callback(inner, task_id),
    };

    let mut acquisition = transport.acquire(&ctx).await;
    inner.registry.clear_handle(task_id);

    // Sideways edge: the direct stream found a hosting page mid-flight.
    // Partial stream output is already discarded; hand the task to the
    // helper with its own downloading state.
    if matches!(acquisition, Ok(Acquisition::RerouteToHelper)) {
        inner
            .registry
            .update(task_id, |t| t.transport = Some(TransportKind::Helper));
        inner.set_status(
            task_id,
            TaskStatus::DownloadingViaHelper,
            0,
            Some("direct link answered with a page; delegating to helper".to_string()),
        );
        acquisition = inner.transports.helper().acquire(&ctx).await;
        inner.registry.clear_handle(task_id);
    }

    match acquisition? {
        Acquisition::Archive(archive_path) => {
            inner.set_status(task_id, TaskStatus::Validating, 0, None);
            if let Err(mismatch) = validate_archive(&archive_path, &resolved.url).await {
                // The offending bytes are useless; drop them before failing.
                if let Err(err) = tokio::fs::remove_file(&archive_path).await {
                    warn!(
                        "could not remove rejected artifact {}: {}",
                        archive_path.display(),
                        err
                    );
                }
                return Err(mismatch);
            }

            inner.set_status(task_id, TaskStatus::Extracting, 0, None);
            let extract_cb = extract_callback(inner, task_id);
            extract::extract(archive_path.clone(), task.target_dir.clone(), extract_cb).await?;

            if let Err(err) = tokio::fs::remove_file(&archive_path).await {
                warn!(
                    "could not remove extracted archive {}: {}",
                    archive_path.display(),
                    err
                );
            }
        }
        Acquisition::InPlace => {
            // Swarm deposit or helper-produced final tree; nothing to extract.
        }
        Acquisition::RerouteToHelper => {
            // The helper itself must never ask for a re-route.
            return Err(EngineError::transport_msg(
                "helper transport requested a re-route",
            ));
        }
    }

    // Best-effort launchable search; absence is not an error.
    let launchable =
        artifact::find_launchable_async(task.target_dir.clone(), task.display_name.clone()).await;
    Ok(launchable)
}

/// Transport progress feeds the task record and the broadcast channel
fn progress_callback(inner: &Arc<EngineInner>, task_id: &TaskId) -> TransportCallback {
    let inner = Arc::clone(inner);
    let task_id = task_id.clone();
    Arc::new(move |event: TransportEvent| {
        inner.transport_progress(&task_id, event);
    })
}

fn extract_callback(
    inner: &Arc<EngineInner>,
    task_id: &TaskId,
) -> Arc<dyn Fn(u8) + Send + Sync> {
    let inner = Arc::clone(inner);
    let task_id = task_id.clone();
    Arc::new(move |percent: u8| {
        inner.transport_progress(&task_id, TransportEvent::percent(percent));
    })
}
