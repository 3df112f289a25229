use ringprims_ring::RingError;

/// Errors that can occur while setting or reading attributes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttrError {
    /// Ring-level failure.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// The peer sent a variable payload larger than the local word buffer.
    #[error("variable attribute payload too large ({size} bytes, buffer {capacity})")]
    Oversized { size: usize, capacity: usize },

    /// A payload whose length is not a whole number of words.
    #[error("malformed variable payload ({len} bytes is not a multiple of 4)")]
    MalformedPayload { len: usize },

    /// A fixed attribute type outside the code table.
    #[error("unknown attribute type {0}")]
    UnknownType(u16),
}

impl AttrError {
    /// Whether the caller should suspend and retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AttrError::Ring(err) => err.is_transient(),
            _ => false,
        }
    }

    /// True when the ring reports a variable attribute at the head, so the
    /// caller must switch to reading it as variable.
    pub fn is_variable_pending(&self) -> bool {
        matches!(self, AttrError::Ring(RingError::VariableAttribute))
    }
}

pub type Result<T> = std::result::Result<T, AttrError>;
