//! Transport strategies: the interchangeable acquisition mechanisms
//!
//! Three structurally different transports implement one contract. An
//! ordered set routes each resolved source to the first transport that
//! claims it, with the external helper as the unconditional fallback — the
//! same pattern the engine uses for everything pluggable.

pub mod direct;
pub mod helper;
pub mod swarm;

pub use direct::DirectTransport;
pub use helper::HelperTransport;
pub use swarm::SwarmTransport;

use async_trait::async_trait;
use librqbit::Session;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::Result;
use crate::core::{TaskId, TransportCallback, TransportKind};
use crate::registry::TaskRegistry;
use crate::resolver::ResolvedSource;

/// What an acquisition produced
#[derive(Debug)]
pub enum Acquisition {
    /// An archive artifact that still needs validation and extraction
    Archive(PathBuf),
    /// Files already in their final place under the destination directory
    InPlace,
    /// The direct stream hit a hosting page; the task must re-route to the
    /// external helper
    RerouteToHelper,
}

/// Everything a transport needs to acquire one task's artifact
pub struct AcquireContext {
    pub task_id: TaskId,
    pub resolved: ResolvedSource,
    pub dest_dir: PathBuf,
    pub display_name: String,
    /// Handle registration target; one live handle per active task
    pub registry: Arc<TaskRegistry>,
    pub on_progress: TransportCallback,
}

/// Common contract of the three acquisition strategies
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether this transport should handle the resolved source
    fn claims(&self, resolved: &ResolvedSource) -> bool;

    /// Acquire the artifact into the destination directory
    ///
    /// Implementations register their `TransportHandle` before suspending and
    /// return `EngineError::Cancelled` when torn down through it.
    async fn acquire(&self, ctx: &AcquireContext) -> Result<Acquisition>;
}

/// The live, cancellable resource behind an in-flight acquisition
///
/// Exactly one variant exists per active task; the cancellation controller
/// picks the teardown by kind.
pub enum TransportHandle {
    /// Abort the in-flight HTTP stream
    Direct { abort: CancellationToken },
    /// Kill the helper process
    Helper { terminate: CancellationToken },
    /// Terminate the swarm session
    Swarm {
        shutdown: CancellationToken,
        session: Arc<Session>,
    },
}

impl TransportHandle {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportHandle::Direct { .. } => TransportKind::Direct,
            TransportHandle::Helper { .. } => TransportKind::Helper,
            TransportHandle::Swarm { .. } => TransportKind::Swarm,
        }
    }

    /// Kind-specific teardown; best-effort, idempotent
    pub async fn teardown(self) {
        match self {
            TransportHandle::Direct { abort } => {
                debug!("aborting direct stream");
                abort.cancel();
            }
            TransportHandle::Helper { terminate } => {
                debug!("terminating helper process");
                terminate.cancel();
            }
            TransportHandle::Swarm { shutdown, session } => {
                debug!("stopping swarm session");
                shutdown.cancel();
                session.stop().await;
            }
        }
    }
}

/// Ordered set of transports, evaluated top to bottom
pub struct TransportSet {
    transports: Vec<Box<dyn Transport>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
        }
    }

    pub fn register<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    /// First transport claiming the source; the helper fallback claims
    /// everything, so this always succeeds on a fully built set
    pub fn select(&self, resolved: &ResolvedSource) -> &dyn Transport {
        self.transports
            .iter()
            .find(|t| t.claims(resolved))
            .map(|t| t.as_ref())
            .expect("transport set must end with a catch-all transport")
    }

    /// The helper transport, for the explicit sideways re-route
    pub fn helper(&self) -> &dyn Transport {
        self.transports
            .iter()
            .find(|t| t.kind() == TransportKind::Helper)
            .map(|t| t.as_ref())
            .expect("transport set must contain the helper transport")
    }
}

impl Default for TransportSet {
    fn default() -> Self {
        Self::new()
    }
}
