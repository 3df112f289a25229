use std::time::Duration;

use ringprims_attr::AttrError;
use ringprims_ring::RingError;

/// Errors that can stop a pipeline or a host peer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Ring-level failure.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Attribute-level failure.
    #[error("attribute error: {0}")]
    Attr(#[from] AttrError),

    /// Invalid stream or set configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The scratch buffer could not be allocated.
    #[error("failed to allocate {size} byte scratch buffer")]
    Allocation { size: usize },

    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A pipeline thread panicked.
    #[error("pipeline thread panicked: {0}")]
    Panicked(String),

    /// I/O error (config files, thread spawn).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the operation should be retried after a wait.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Ring(err) => err.is_transient(),
            PipelineError::Attr(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Stable failure code reported for a stopped pipeline.
    pub fn code(&self) -> u16 {
        match self {
            PipelineError::Ring(_) => 10,
            PipelineError::Attr(AttrError::Ring(_)) => 10,
            PipelineError::Attr(_) => 20,
            PipelineError::Config(_) => 30,
            PipelineError::Allocation { .. } => 40,
            PipelineError::Timeout(_) => 50,
            PipelineError::Io(_) | PipelineError::Json(_) => 60,
            PipelineError::Panicked(_) => 70,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
