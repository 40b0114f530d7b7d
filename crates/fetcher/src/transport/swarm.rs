//! Peer-to-peer swarm transport
//!
//! Joins a swarm rooted at the task's destination directory; the swarm
//! deposits final files directly, so there is no separate extraction step.
//! Each task owns its own session, which keeps teardown scoped to the task.

use async_trait::async_trait;
use librqbit::{AddTorrent, AddTorrentOptions, Session};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::{TransportEvent, TransportKind};
use crate::resolver::{is_peer_reference, ResolvedSource};

use super::{AcquireContext, Acquisition, Transport, TransportHandle};

pub struct SwarmTransport {
    poll_interval: Duration,
}

impl SwarmTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.swarm_poll_interval,
        }
    }
}

#[async_trait]
impl Transport for SwarmTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Swarm
    }

    /// Claims magnet-style identifiers and torrent-descriptor URLs
    fn claims(&self, resolved: &ResolvedSource) -> bool {
        is_peer_reference(&resolved.url)
    }

    async fn acquire(&self, ctx: &AcquireContext) -> Result<Acquisition> {
        let session = Session::new(ctx.dest_dir.clone())
            .await
            .map_err(|err| EngineError::Transport {
                context: "starting swarm session".to_string(),
                source: Some(err.into()),
            })?;

        let shutdown = CancellationToken::new();
        ctx.registry.register_handle(
            &ctx.task_id,
            TransportHandle::Swarm {
                shutdown: shutdown.clone(),
                session: session.clone(),
            },
        );

        debug!(
            "joining swarm for {} rooted at {}",
            ctx.resolved.url,
            ctx.dest_dir.display()
        );

        let handle = session
            .add_torrent(
                AddTorrent::from_url(&ctx.resolved.url),
                Some(AddTorrentOptions {
                    overwrite: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|err| EngineError::Transport {
                context: format!("joining swarm for '{}'", ctx.resolved.url),
                source: Some(err.into()),
            })?
            .into_handle()
            .ok_or_else(|| {
                EngineError::transport_msg(format!(
                    "swarm did not produce a live torrent for '{}'",
                    ctx.resolved.url
                ))
            })?;

        let mut completed = Box::pin(handle.wait_until_completed());
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Drop the torrent's partial files before the filesystem
                    // sweep runs, then stop the session.
                    if let Err(err) = session.delete(handle.id().into(), true).await {
                        warn!("could not delete torrent on cancel: {:#}", err);
                    }
                    session.stop().await;
                    return Err(EngineError::Cancelled);
                }
                result = &mut completed => {
                    result.map_err(|err| EngineError::Transport {
                        context: format!("swarm download of '{}'", ctx.resolved.url),
                        source: Some(err.into()),
                    })?;
                    break;
                }
                _ = ticker.tick() => {
                    let stats = handle.stats();
                    if stats.total_bytes > 0 {
                        let percent =
                            ((stats.progress_bytes * 100) / stats.total_bytes).min(100) as u8;
                        (ctx.on_progress)(TransportEvent::percent(percent));
                    }
                }
            }
        }

        (ctx.on_progress)(TransportEvent::percent(100));
        session.stop().await;
        debug!("swarm download complete for {}", ctx.resolved.url);
        Ok(Acquisition::InPlace)
    }
}
