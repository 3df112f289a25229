//! Stream pipelines over ring channels.
//!
//! This is the orchestration layer:
//! - [`NotificationBridge`] turns ring notifications into blocking waits
//! - [`StreamPipeline`] runs the receive → transform → send cycle for one stream
//! - [`PipelineSet`] runs independent pipelines on their own threads
//! - [`HostPeer`] plays the remote domain that feeds and drains a pipeline

pub mod config;
pub mod error;
pub mod host;
pub mod notify;
pub mod pipeline;
pub mod set;
pub mod state;
pub mod transform;

pub use config::{PipelineSetConfig, StreamConfig, TransformConfig};
pub use error::{PipelineError, Result};
pub use host::{HostPeer, ReceivedRecord, RecordEvent};
pub use notify::{NotificationBridge, ShutdownSignal, TransferFlags, WaitOutcome, Waker};
pub use pipeline::{settle_grant, PipelineStats, StreamPipeline};
pub use set::{PipelineReport, PipelineSet};
pub use state::{TransferPhase, TransferState};
pub use transform::{OpKind, ScaleTransform, Transform, UnitSize};
