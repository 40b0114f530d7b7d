//! Configuration for the download engine

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for the download engine
///
/// Every field has a working default; `from_env` overrides the paths and the
/// helper command from the environment the way the original deployment does.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory under which each task gets its own subdirectory
    pub download_dir: PathBuf,
    /// Directory for persisted engine state (history file, helper scratch)
    pub state_dir: PathBuf,
    /// External helper executable for sources that need scripted interaction
    pub helper_command: PathBuf,
    pub user_agent: String,
    /// Timeout for each resolver probe request
    pub probe_timeout: Duration,
    /// Timeout for a full direct-stream request
    pub request_timeout: Duration,
    /// Redirect-following bound for the resolver
    pub max_redirect_hops: usize,
    /// Retained terminal history entries; oldest evicted beyond this
    pub history_limit: usize,
    /// Delay between transport teardown and filesystem cleanup, letting the
    /// OS release file locks held by the just-terminated transport
    pub cancel_grace: Duration,
    /// Retry policy for recursive deletion during cancellation cleanup
    pub cleanup_retry: RetryPolicy,
    /// How often the swarm transport samples its fraction-complete metric
    pub swarm_poll_interval: Duration,
    /// Broadcast capacity of the progress channel
    pub progress_capacity: usize,
}

impl EngineConfig {
    /// Read paths and helper location from the environment, defaulting the
    /// rest
    ///
    /// Recognized variables: `FETCHER_DOWNLOAD_DIR`, `FETCHER_STATE_DIR`,
    /// `FETCHER_HELPER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("FETCHER_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("FETCHER_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(helper) = std::env::var("FETCHER_HELPER") {
            config.helper_command = PathBuf::from(helper);
        }
        config
    }

    /// Path of the persisted history file
    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("download-history.json")
    }

    pub fn with_download_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_state_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_helper_command<P: Into<PathBuf>>(mut self, helper: P) -> Self {
        self.helper_command = helper.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            download_dir: home.join(".fetcher").join("downloads"),
            state_dir: home.join(".fetcher"),
            helper_command: PathBuf::from("fetcher-helper"),
            user_agent: "fetcher/0.1.0".to_string(),
            probe_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300), // 5 minutes for the full stream
            max_redirect_hops: 10,
            history_limit: 100,
            cancel_grace: Duration::from_millis(500),
            cleanup_retry: RetryPolicy::fixed(3, Duration::from_millis(200)),
            swarm_poll_interval: Duration::from_millis(500),
            progress_capacity: 256,
        }
    }
}
