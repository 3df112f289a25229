//! Control attributes multiplexed with ring data.
//!
//! Every attribute is pinned to a position in the data stream:
//! - a fixed attribute carries only a type code (DataStart, DataEnd, RemoteShutdown)
//! - a variable attribute carries a payload of little-endian 32-bit words
//!
//! Readers observe attributes and data strictly in write order.

pub mod channel;
pub mod codec;
pub mod codes;
pub mod error;

pub use channel::{AttributeChannel, FixedAttribute, VariableAttribute, DEFAULT_MAX_WORDS};
pub use codec::{decode_words, encode_words, WORD_SIZE};
pub use codes::{
    AttrType, NotifyCode, DATA_END, DATA_START, NOTIFY_DATA_END, NOTIFY_DATA_START, NOTIFY_NONE,
    NOTIFY_REMOTE_SHUTDOWN, REMOTE_SHUTDOWN, VARIABLE_RECORD_SIZE,
};
pub use error::{AttrError, Result};
