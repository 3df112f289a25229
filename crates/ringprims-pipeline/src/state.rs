use std::fmt;

use tracing::{debug, warn};

/// Phase of a stream pipeline's transfer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    AwaitingStart,
    ReceivingData,
    Draining,
    SendingStart,
    SendingData,
    SendingEnd,
    Idle,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferPhase::AwaitingStart => "awaiting-start",
            TransferPhase::ReceivingData => "receiving-data",
            TransferPhase::Draining => "draining",
            TransferPhase::SendingStart => "sending-start",
            TransferPhase::SendingData => "sending-data",
            TransferPhase::SendingEnd => "sending-end",
            TransferPhase::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Per-pipeline transfer bookkeeping.
///
/// Owned by the pipeline thread; callbacks never see it.
#[derive(Debug, Clone)]
pub struct TransferState {
    phase: TransferPhase,
    /// Record size used until a variable attribute supplies one.
    default_record_size: usize,
    /// Size announced by the last variable attribute; starts each record's first window.
    record_size: usize,
    /// Bytes still expected in the current record window.
    remaining: usize,
    /// Bytes stored in scratch for the current record.
    received: usize,
    /// Bytes dropped from the current record because scratch was full.
    dropped: usize,
}

impl TransferState {
    pub fn new(default_record_size: usize) -> Self {
        Self {
            phase: TransferPhase::Idle,
            default_record_size,
            record_size: default_record_size,
            remaining: default_record_size,
            received: 0,
            dropped: 0,
        }
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Move to `phase`, logging the transition.
    pub fn enter(&mut self, stream: &str, phase: TransferPhase) {
        if self.phase != phase {
            debug!(stream, from = %self.phase, to = %phase, "phase");
        }
        self.phase = phase;
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Adopt the size carried by a variable attribute. Zero falls back to
    /// the default record size.
    pub fn set_record_size(&mut self, size: usize) {
        self.record_size = if size == 0 {
            self.default_record_size
        } else {
            size
        };
        self.remaining = self.record_size;
    }

    /// Size to request from the inbound ring, at most `capacity`.
    pub fn next_request(&self, capacity: usize) -> usize {
        self.remaining.clamp(1, capacity.max(1))
    }

    /// Store a granted fragment in `scratch` and advance the record window.
    ///
    /// Bytes past the end of `scratch` are dropped; the count dropped is returned.
    pub fn store(&mut self, stream: &str, scratch: &mut [u8], fragment: &[u8]) -> usize {
        let room = scratch.len().saturating_sub(self.received);
        let fit = fragment.len().min(room);
        scratch[self.received..self.received + fit].copy_from_slice(&fragment[..fit]);
        self.received += fit;

        let dropped = fragment.len() - fit;
        if dropped > 0 {
            if self.dropped == 0 {
                warn!(
                    stream,
                    capacity = scratch.len(),
                    "record exceeds scratch buffer, truncating"
                );
            }
            self.dropped += dropped;
        }

        // A completed window restarts at the configured size.
        self.remaining = self.remaining.saturating_sub(fragment.len());
        if self.remaining == 0 {
            self.remaining = self.default_record_size;
        }
        dropped
    }

    /// Reset receive bookkeeping for the next record. The record size carries over.
    pub fn reset_receive(&mut self) {
        self.remaining = self.record_size;
        self.received = 0;
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(grants: &[usize], record: &[u8], scratch_len: usize) -> (Vec<u8>, TransferState) {
        let mut state = TransferState::new(record.len());
        let mut scratch = vec![0u8; scratch_len];
        let mut offset = 0;
        for &len in grants {
            state.store("test", &mut scratch, &record[offset..offset + len]);
            offset += len;
        }
        (scratch, state)
    }

    #[test]
    fn small_grants_match_one_grant() {
        let record: Vec<u8> = (0..500u32).map(|i| (i * 7 % 251) as u8).collect();
        let (many, many_state) = feed(&[100; 5], &record, 500);
        let (one, one_state) = feed(&[500], &record, 500);
        assert_eq!(many, one);
        assert_eq!(many, record);
        assert_eq!(many_state.received(), one_state.received());
    }

    #[test]
    fn remaining_resets_at_record_boundary() {
        let mut state = TransferState::new(300);
        let mut scratch = vec![0u8; 1024];
        assert_eq!(state.next_request(4096), 300);
        state.store("test", &mut scratch, &[1; 200]);
        assert_eq!(state.next_request(4096), 100);
        state.store("test", &mut scratch, &[1; 100]);
        assert_eq!(state.remaining(), 300);
    }

    #[test]
    fn request_is_bounded_by_ring_capacity() {
        let state = TransferState::new(8192);
        assert_eq!(state.next_request(1024), 1024);
    }

    #[test]
    fn overflow_truncates_and_counts() {
        let mut state = TransferState::new(16);
        let mut scratch = vec![0u8; 10];
        assert_eq!(state.store("test", &mut scratch, &[3; 6]), 0);
        assert_eq!(state.store("test", &mut scratch, &[4; 6]), 2);
        assert_eq!(state.store("test", &mut scratch, &[5; 4]), 4);
        assert_eq!(&scratch[..], &[3, 3, 3, 3, 3, 3, 4, 4, 4, 4]);
        assert_eq!(state.dropped(), 6);

        state.reset_receive();
        assert_eq!(state.received(), 0);
        assert_eq!(state.dropped(), 0);
    }

    #[test]
    fn completed_window_restarts_at_configured_size() {
        let mut state = TransferState::new(1024);
        let mut scratch = vec![0u8; 1024];
        state.set_record_size(640);
        assert_eq!(state.next_request(4096), 640);
        state.store("test", &mut scratch, &[1; 640]);
        assert_eq!(state.remaining(), 1024);
        assert_eq!(state.record_size(), 640);

        state.reset_receive();
        assert_eq!(state.remaining(), 640);
    }

    #[test]
    fn variable_size_carries_over_reset() {
        let mut state = TransferState::new(1024);
        state.set_record_size(640);
        state.reset_receive();
        assert_eq!(state.remaining(), 640);
        state.set_record_size(0);
        assert_eq!(state.record_size(), 1024);
    }
}
