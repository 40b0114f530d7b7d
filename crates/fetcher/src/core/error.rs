//! Error types for the download engine with context and classification

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced anywhere in the acquisition pipeline
#[derive(Error, Debug)]
pub enum EngineError {
    /// The downloaded artifact is not the expected archive
    #[error("artifact from '{url}' is not a valid archive: {kind} ({detail})")]
    ValidationMismatch {
        kind: MismatchKind,
        url: String,
        detail: String,
    },

    /// Network, helper-process or swarm failure during acquisition
    #[error("transport failure while {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// HTTP-level errors with the offending URL attached
    #[error("HTTP request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Entry read or write failure mid-archive
    #[error("extraction of '{}' failed", archive.display())]
    Extraction {
        archive: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File system I/O errors with path context
    #[error("file operation failed on '{}'", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cancel requested against a task that is no longer active
    #[error("task '{id}' not found or not active")]
    CancellationRace { id: String },

    /// The transport was torn down by a cancellation request
    ///
    /// This is a control-flow signal, not a user-facing failure: the driver
    /// observing it yields the terminal commit to the cancellation path.
    #[error("acquisition cancelled")]
    Cancelled,

    /// A submission that cannot be accepted
    #[error("cannot accept task: {reason}")]
    Submit { reason: String },

    /// Requested content was not found on disk
    #[error("'{name}' is not installed")]
    NotInstalled { name: String },
}

/// What a downloaded artifact turned out to be instead of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// The server returned a human-facing markup page
    MarkupPage,
    /// The artifact is a peer-to-peer descriptor, not an archive
    TorrentDescriptor,
    /// The server returned a structured error body
    StructuredError,
    /// Zero-byte or truncated download
    Empty,
    /// Leading bytes match no known signature
    Unrecognized,
}

impl std::fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MismatchKind::MarkupPage => write!(f, "markup page"),
            MismatchKind::TorrentDescriptor => write!(f, "torrent descriptor"),
            MismatchKind::StructuredError => write!(f, "structured error body"),
            MismatchKind::Empty => write!(f, "empty file"),
            MismatchKind::Unrecognized => write!(f, "unrecognized signature"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Build a transport error from any underlying error
    pub fn transport<C, E>(context: C, source: E) -> Self
    where
        C: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::Transport {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build a transport error with no underlying cause
    pub fn transport_msg<C: Into<String>>(context: C) -> Self {
        EngineError::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// True for the internal cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::ValidationMismatch { .. } => "validation_mismatch",
            EngineError::Transport { .. } => "transport",
            EngineError::HttpRequest { .. } => "http_request",
            EngineError::Extraction { .. } => "extraction",
            EngineError::Filesystem { .. } => "filesystem",
            EngineError::CancellationRace { .. } => "cancellation_race",
            EngineError::Cancelled => "cancelled",
            EngineError::Submit { .. } => "submit",
            EngineError::NotInstalled { .. } => "not_installed",
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        let url = error
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        EngineError::HttpRequest { url, source: error }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Filesystem {
            path: PathBuf::from("<unknown>"),
            source: error,
        }
    }
}
