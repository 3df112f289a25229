//! Shared ring segments connecting two execution domains.
//!
//! A segment is a fixed-capacity circular byte buffer with exactly one
//! writer endpoint and one reader endpoint, plus an attribute queue whose
//! entries are pinned to positions in the data stream:
//! - [`RingRegistry`] creates, opens and deletes segments by name
//! - [`RingChannel`] is one endpoint: acquire, release, cancel, attributes
//! - one-shot watermark notifiers and peer messages wake the other side
//!
//! This is the lowest layer of ringprims. Everything else builds on the
//! [`RingChannel`] type provided here.

pub mod channel;
pub mod error;
pub mod flags;
pub mod registry;
mod segment;

pub use channel::{CloseOutcome, Grant, GrantStatus, NotifyCallback, NotifyMsg, RingChannel};
pub use error::{Result, RingError};
pub use flags::{NotifyMode, OpenFlags, Role};
pub use registry::{RingAttrs, RingRegistry};

/// Attribute bookkeeping cost of one queued attribute, in bytes.
pub const ATTR_HEADER_SIZE: usize = 8;
