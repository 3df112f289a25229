use crate::flags::Role;

/// Errors that can occur in ring segment operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// No segment is registered under the name (yet).
    #[error("ring '{name}' not found")]
    NotFound { name: String },

    /// A segment with the same name already exists.
    #[error("ring '{name}' already exists")]
    AlreadyExists { name: String },

    /// The requested endpoint role is already attached.
    #[error("ring '{name}' already has an attached {role}")]
    AlreadyOpen { name: String, role: Role },

    /// Reader side: no committed data and no pending attribute.
    #[error("ring buffer empty")]
    Empty,

    /// Writer side: not enough free space for the request.
    #[error("ring buffer full")]
    Full,

    /// Reader side: an attribute sits at the read position and must be consumed first.
    #[error("attribute pending at read position")]
    PendingAttribute,

    /// Reader side: data precedes the next attribute and must be drained first.
    #[error("data pending before next attribute")]
    PendingData,

    /// Reader side: the next attribute carries a variable payload.
    #[error("next attribute is variable")]
    VariableAttribute,

    /// Reader side: the next attribute is fixed (no payload).
    #[error("next attribute is fixed")]
    FixedAttribute,

    /// No attribute is queued.
    #[error("no attribute queued")]
    NoAttribute,

    /// The caller's buffer is smaller than the queued variable payload.
    #[error("variable attribute payload too large ({size} bytes, capacity {capacity})")]
    OversizedPayload { size: usize, capacity: usize },

    /// The attribute region has no room for another entry.
    #[error("attribute buffer full ({used} of {capacity} bytes used)")]
    AttributeBufferFull { used: usize, capacity: usize },

    /// The operation is not allowed in the endpoint's current state.
    #[error("operation not allowed in current state: {0}")]
    WrongState(&'static str),

    /// The operation is not available for this endpoint role.
    #[error("operation requires the {expected} role")]
    WrongRole { expected: Role },

    /// A request size of zero or beyond the ring capacity.
    #[error("invalid request size {requested} (capacity {capacity})")]
    InvalidSize { requested: usize, capacity: usize },

    /// Releasing more bytes than the outstanding grant holds.
    #[error("release of {requested} bytes exceeds outstanding grant of {outstanding}")]
    InvalidRelease { requested: usize, outstanding: usize },

    /// No grant is outstanding on this endpoint.
    #[error("no outstanding grant")]
    NoGrant,

    /// An exact-size grant would wrap past the foot buffer.
    #[error("foot buffer too small ({needed} bytes needed, {available} available)")]
    FootBufferTooSmall { needed: usize, available: usize },

    /// The notification watermark cannot be reached.
    #[error("watermark {watermark} exceeds capacity {capacity}")]
    InvalidWatermark { watermark: usize, capacity: usize },

    /// The opposite endpoint has not registered a notifier.
    #[error("peer has no registered notifier")]
    PeerNotReady,

    /// The endpoint has been closed.
    #[error("ring endpoint closed")]
    Closed,
}

impl RingError {
    /// Whether the condition clears on its own once the peer makes progress.
    ///
    /// Callers suspend and retry on transient errors; everything else is a
    /// configuration or protocol fault.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RingError::NotFound { .. }
                | RingError::Empty
                | RingError::Full
                | RingError::PendingData
                | RingError::NoAttribute
                | RingError::AttributeBufferFull { .. }
                | RingError::WrongState(_)
                | RingError::PeerNotReady
        )
    }
}

pub type Result<T> = std::result::Result<T, RingError>;
