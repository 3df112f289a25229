//! Shared-memory ring channels with in-band attributes and record pipelines.
//!
//! # Crate Structure
//!
//! - [`ring`]: ring buffers with grants, attribute queues and notifications
//! - [`attr`]: attribute codes and the fixed/variable attribute channel
//! - [`pipeline`]: per-stream receive/transform/send pipelines (behind `pipeline` feature)

/// Re-export ring types.
pub mod ring {
    pub use ringprims_ring::*;
}

/// Re-export attribute types.
pub mod attr {
    pub use ringprims_attr::*;
}

/// Re-export pipeline types (requires `pipeline` feature).
#[cfg(feature = "pipeline")]
pub mod pipeline {
    pub use ringprims_pipeline::*;
}
