use ringprims_ring::{RingChannel, RingError};
use tracing::trace;

use crate::codec::{decode_words, encode_words, WORD_SIZE};
use crate::codes::AttrType;
use crate::error::{AttrError, Result};

/// Default word capacity for variable payloads: one record-size word.
pub const DEFAULT_MAX_WORDS: usize = 1;

/// A fixed attribute consumed from the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAttribute {
    pub kind: AttrType,
    pub param: u32,
}

/// A variable attribute consumed from the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableAttribute {
    pub kind: u16,
    pub param: u32,
    pub words: Vec<u32>,
}

impl VariableAttribute {
    pub fn first_word(&self) -> Option<u32> {
        self.words.first().copied()
    }
}

/// Typed attribute access on top of a ring endpoint.
///
/// Holds the word buffer that variable payloads are decoded into; its
/// size bounds the payloads this side accepts.
#[derive(Debug, Clone)]
pub struct AttributeChannel {
    words: Vec<u32>,
}

impl AttributeChannel {
    pub fn new(max_words: usize) -> Self {
        Self {
            words: vec![0; max_words],
        }
    }

    /// Largest payload accepted by [`get_variable`](Self::get_variable), in words.
    pub fn max_words(&self) -> usize {
        self.words.len()
    }

    /// Queue a fixed attribute at the writer's current position.
    pub fn set_fixed(&self, ring: &mut RingChannel, kind: AttrType) -> Result<()> {
        ring.set_attribute(kind.code(), 0)?;
        trace!(ring = ring.name(), %kind, "fixed attribute set");
        Ok(())
    }

    /// Queue a variable attribute carrying `words` at the writer's current position.
    pub fn set_variable(&self, ring: &mut RingChannel, kind: u16, words: &[u32]) -> Result<()> {
        ring.set_vattribute(kind, 0, encode_words(words))?;
        trace!(ring = ring.name(), kind, words = words.len(), "variable attribute set");
        Ok(())
    }

    /// Consume the fixed attribute at the reader's position.
    ///
    /// A type outside the code table is consumed and reported as
    /// `UnknownType`.
    pub fn get_fixed(&mut self, ring: &mut RingChannel) -> Result<FixedAttribute> {
        let (kind, param) = ring.get_attribute()?;
        let kind = AttrType::try_from(kind)?;
        Ok(FixedAttribute { kind, param })
    }

    /// Consume the variable attribute at the reader's position.
    ///
    /// A payload larger than the word buffer is left queued and reported
    /// as `Oversized`.
    pub fn get_variable(&mut self, ring: &mut RingChannel) -> Result<VariableAttribute> {
        let capacity = self.words.len() * WORD_SIZE;
        let (kind, param, payload) = ring.get_vattribute(capacity).map_err(|err| match err {
            RingError::OversizedPayload { size, capacity } => {
                AttrError::Oversized { size, capacity }
            }
            other => AttrError::Ring(other),
        })?;
        let count = decode_words(payload, &mut self.words)?;
        Ok(VariableAttribute {
            kind,
            param,
            words: self.words[..count].to_vec(),
        })
    }
}

impl Default for AttributeChannel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORDS)
    }
}
