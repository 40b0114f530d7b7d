//! Direct HTTP stream transport
//!
//! Streams the response body to a temporary file with byte-based progress.
//! A declared markup content type short-circuits the whole strategy before
//! the body is written: hosting services commonly answer the naive direct
//! link with a human-facing page, and that case re-routes to the external
//! helper instead of failing.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::validation::is_markup_content_type;
use crate::core::{TransportEvent, TransportKind};
use crate::resolver::{looks_like_archive, ResolvedSource};

use super::{AcquireContext, Acquisition, Transport, TransportHandle};

/// File name of the streamed artifact inside the task's directory
pub const ARTIFACT_NAME: &str = "artifact.zip";

pub struct DirectTransport {
    client: Client,
}

impl DirectTransport {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    /// Claims URLs whose artifact extension strongly suggests the archive
    fn claims(&self, resolved: &ResolvedSource) -> bool {
        looks_like_archive(&resolved.url)
    }

    async fn acquire(&self, ctx: &AcquireContext) -> Result<Acquisition> {
        let abort = CancellationToken::new();
        ctx.registry.register_handle(
            &ctx.task_id,
            TransportHandle::Direct {
                abort: abort.clone(),
            },
        );

        let url = &ctx.resolved.url;
        debug!("direct stream of {} into {}", url, ctx.dest_dir.display());

        let response = tokio::select! {
            _ = abort.cancelled() => return Err(EngineError::Cancelled),
            response = self.client.get(url.as_str()).send() => response?,
        };
        let response = response.error_for_status()?;

        // Content-type sniff: a markup body means a hosting page the direct
        // strategy cannot handle. Abandon before writing anything.
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            eprintln!("DBG direct content_type={:?} markup={}", content_type, is_markup_content_type(content_type));
            if is_markup_content_type(content_type) {
                warn!("{} answered with {}, re-routing to helper", url, content_type);
                discard_partial(&ctx.dest_dir).await;
                return Ok(Acquisition::RerouteToHelper);
            }
        }

        let total = response.content_length();
        let artifact = ctx.dest_dir.join(ARTIFACT_NAME);
        let part = artifact.with_extension("zip.part");

        let mut file = fs::File::create(&part)
            .await
            .map_err(|source| EngineError::Filesystem {
                path: part.clone(),
                source,
            })?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_report = Instant::now();

        loop {
            let chunk = tokio::select! {
                _ = abort.cancelled() => {
                    drop(file);
                    discard_partial(&ctx.dest_dir).await;
                    return Err(EngineError::Cancelled);
                }
                next = stream.next() => match next {
                    Some(chunk) => chunk?,
                    None => break,
                },
            };

            file.write_all(&chunk)
                .await
                .map_err(|source| EngineError::Filesystem {
                    path: part.clone(),
                    source,
                })?;
            downloaded += chunk.len() as u64;

            // Report at most every 100ms to avoid spamming observers
            if last_report.elapsed().as_millis() >= 100 {
                (ctx.on_progress)(progress_event(downloaded, total));
                last_report = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|source| EngineError::Filesystem {
                path: part.clone(),
                source,
            })?;
        file.sync_all()
            .await
            .map_err(|source| EngineError::Filesystem {
                path: part.clone(),
                source,
            })?;
        drop(file);

        fs::rename(&part, &artifact)
            .await
            .map_err(|source| EngineError::Filesystem {
                path: artifact.clone(),
                source,
            })?;

        (ctx.on_progress)(progress_event(downloaded, total));
        debug!("direct stream complete: {} bytes", downloaded);
        Ok(Acquisition::Archive(artifact))
    }
}

fn progress_event(downloaded: u64, total: Option<u64>) -> TransportEvent {
    match total {
        Some(total) if total > 0 => {
            TransportEvent::percent(((downloaded * 100) / total).min(100) as u8)
        }
        _ => TransportEvent::message(format!(
            "{:.2} MiB downloaded",
            downloaded as f64 / (1024.0 * 1024.0)
        )),
    }
}

/// Remove any partial stream output so the next strategy starts clean
async fn discard_partial(dest_dir: &std::path::Path) {
    for name in [ARTIFACT_NAME, "artifact.zip.part"] {
        let path: PathBuf = dest_dir.join(name);
        if fs::metadata(&path).await.is_ok() {
            if let Err(err) = fs::remove_file(&path).await {
                warn!("could not discard partial file {}: {}", path.display(), err);
            }
        }
    }
}
