use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{AttrError, Result};

/// Size of one payload word in bytes.
pub const WORD_SIZE: usize = 4;

/// Encode payload words for a variable attribute.
///
/// Wire format: each word as 4 little-endian bytes, no header. The
/// attribute type and word count travel in the ring's attribute entry.
pub fn encode_words(words: &[u32]) -> Bytes {
    let mut dst = BytesMut::with_capacity(words.len() * WORD_SIZE);
    for word in words {
        dst.put_u32_le(*word);
    }
    dst.freeze()
}

/// Decode a variable payload into `dst`, returning the word count.
///
/// `dst` must be large enough for the whole payload.
pub fn decode_words(mut src: Bytes, dst: &mut [u32]) -> Result<usize> {
    if src.len() % WORD_SIZE != 0 {
        return Err(AttrError::MalformedPayload { len: src.len() });
    }
    let count = src.len() / WORD_SIZE;
    if count > dst.len() {
        return Err(AttrError::Oversized {
            size: src.len(),
            capacity: dst.len() * WORD_SIZE,
        });
    }
    for slot in dst.iter_mut().take(count) {
        *slot = src.get_u32_le();
    }
    Ok(count)
}
