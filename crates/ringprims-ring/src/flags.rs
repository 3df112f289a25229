//! Endpoint roles, open flags and notifier modes.

use std::fmt;

/// Which side of a segment an endpoint drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Reader,
    Writer,
}

impl Role {
    /// The opposite endpoint role.
    pub fn peer(self) -> Self {
        match self {
            Role::Reader => Role::Writer,
            Role::Writer => Role::Reader,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => f.write_str("reader"),
            Role::Writer => f.write_str("writer"),
        }
    }
}

bitflags::bitflags! {
    /// Composable open flags.
    ///
    /// The cache-use bits are carried for interoperability with peers that map
    /// the segment through non-coherent caches; in-process they are recorded
    /// only. `NEED_EXACT_SIZE` changes writer grant semantics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Cache coherence required for the control structure.
        const CONTROL_CACHE_USE = 1 << 0;
        /// Cache coherence required for the data buffer.
        const DATA_BUF_CACHE_USE = 1 << 1;
        /// Cache coherence required for the attribute buffer.
        const ATTR_BUF_CACHE_USE = 1 << 2;
        /// Writer grants are all-or-nothing at the requested size.
        const NEED_EXACT_SIZE = 1 << 3;

        /// All three cache-use bits.
        const CACHE_COHERENT = Self::CONTROL_CACHE_USE.bits()
            | Self::DATA_BUF_CACHE_USE.bits()
            | Self::ATTR_BUF_CACHE_USE.bits();
    }
}

/// Trigger policy for a registered notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMode {
    /// Fire once when the watermark condition holds, then stay disarmed
    /// until the notifier is set again.
    #[default]
    Once,
    /// Fire every time the watermark condition holds after a peer update.
    Always,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let flags = OpenFlags::CACHE_COHERENT | OpenFlags::NEED_EXACT_SIZE;
        assert!(flags.contains(OpenFlags::DATA_BUF_CACHE_USE));
        assert!(flags.contains(OpenFlags::NEED_EXACT_SIZE));
        assert_eq!(flags.bits(), 0xF);
        assert!(!OpenFlags::CACHE_COHERENT.contains(OpenFlags::NEED_EXACT_SIZE));
    }

    #[test]
    fn from_bits_drops_unknown() {
        assert_eq!(OpenFlags::from_bits_truncate(0xF0), OpenFlags::empty());
        assert!(OpenFlags::from_bits(0x10).is_none());
        assert_eq!(
            OpenFlags::from_bits(0x7),
            Some(OpenFlags::CACHE_COHERENT)
        );
    }

    #[test]
    fn role_peer_flips() {
        assert_eq!(Role::Reader.peer(), Role::Writer);
        assert_eq!(Role::Writer.peer(), Role::Reader);
        assert_eq!(Role::Writer.to_string(), "writer");
    }
}
