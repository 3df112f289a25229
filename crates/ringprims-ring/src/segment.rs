use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;

use crate::channel::{Grant, GrantStatus, NotifyCallback};
use crate::error::{Result, RingError};
use crate::flags::{NotifyMode, Role};
use crate::registry::RingAttrs;
use crate::ATTR_HEADER_SIZE;

/// One named ring: the memory both endpoints share.
pub(crate) struct Segment {
    pub(crate) name: String,
    state: Mutex<SegmentState>,
    /// Signalled whenever queued attributes are consumed or the reader detaches.
    attrs_drained: Condvar,
}

impl Segment {
    pub(crate) fn new(name: String, attrs: &RingAttrs) -> Self {
        Self {
            name,
            state: Mutex::new(SegmentState::new(attrs)),
            attrs_drained: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SegmentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn notify_drained(&self) {
        self.attrs_drained.notify_all();
    }

    /// Block until no attribute is queued, the reader is gone, or `deadline` passes.
    ///
    /// Returns the number of attribute bytes still queued.
    pub(crate) fn wait_attrs_drained(&self, deadline: Instant) -> usize {
        let mut state = self.lock();
        loop {
            if state.attr_bytes == 0 || !state.endpoint(Role::Reader).attached {
                return state.attr_bytes;
            }
            let now = Instant::now();
            if now >= deadline {
                return state.attr_bytes;
            }
            state = match self.attrs_drained.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GrantSpan {
    /// Physical offset into `data` (may lie in the foot region).
    offset: usize,
    len: usize,
}

pub(crate) struct RawAttribute {
    /// Stream position the attribute is pinned to.
    position: u64,
    kind: u16,
    param: u32,
    payload: Option<Bytes>,
}

impl RawAttribute {
    fn cost(&self) -> usize {
        ATTR_HEADER_SIZE + self.payload.as_ref().map_or(0, Bytes::len)
    }
}

struct Notifier {
    mode: NotifyMode,
    watermark: usize,
    armed: bool,
    callback: NotifyCallback,
}

#[derive(Default)]
pub(crate) struct Endpoint {
    pub(crate) attached: bool,
    notifier: Option<Notifier>,
    grant: Option<GrantSpan>,
}

pub(crate) struct SegmentState {
    /// Data region followed by the foot region.
    data: Vec<u8>,
    capacity: usize,
    foot: usize,
    attr_capacity: usize,
    read_pos: u64,
    write_pos: u64,
    attrs: VecDeque<RawAttribute>,
    pub(crate) attr_bytes: usize,
    reader: Endpoint,
    writer: Endpoint,
}

impl SegmentState {
    fn new(attrs: &RingAttrs) -> Self {
        Self {
            data: vec![0; attrs.data_buf_size + attrs.foot_buf_size],
            capacity: attrs.data_buf_size,
            foot: attrs.foot_buf_size,
            attr_capacity: attrs.attr_buf_size,
            read_pos: 0,
            write_pos: 0,
            attrs: VecDeque::new(),
            attr_bytes: 0,
            reader: Endpoint::default(),
            writer: Endpoint::default(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Reader => &self.reader,
            Role::Writer => &self.writer,
        }
    }

    fn endpoint_mut(&mut self, role: Role) -> &mut Endpoint {
        match role {
            Role::Reader => &mut self.reader,
            Role::Writer => &mut self.writer,
        }
    }

    /// Committed bytes not yet released by the reader.
    pub(crate) fn used(&self) -> usize {
        (self.write_pos - self.read_pos) as usize
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity - self.used()
    }

    fn physical(&self, position: u64) -> usize {
        (position % self.capacity as u64) as usize
    }

    pub(crate) fn attach(&mut self, role: Role) -> bool {
        let endpoint = self.endpoint_mut(role);
        if endpoint.attached {
            return false;
        }
        endpoint.attached = true;
        true
    }

    pub(crate) fn detach(&mut self, role: Role) {
        *self.endpoint_mut(role) = Endpoint::default();
    }

    pub(crate) fn has_grant(&self, role: Role) -> bool {
        self.endpoint(role).grant.is_some()
    }

    pub(crate) fn acquire(&mut self, role: Role, requested: usize, exact: bool) -> Result<Grant> {
        if self.endpoint(role).grant.is_some() {
            return Err(RingError::WrongState("grant already outstanding"));
        }
        if requested == 0 || requested > self.capacity {
            return Err(RingError::InvalidSize {
                requested,
                capacity: self.capacity,
            });
        }
        let (span, grant) = match role {
            Role::Writer => self.acquire_write(requested, exact)?,
            Role::Reader => self.acquire_read(requested)?,
        };
        self.endpoint_mut(role).grant = Some(span);
        Ok(grant)
    }

    fn acquire_write(&self, requested: usize, exact: bool) -> Result<(GrantSpan, Grant)> {
        let free = self.free();
        if free == 0 || (exact && free < requested) {
            return Err(RingError::Full);
        }
        let offset = self.physical(self.write_pos);
        let contiguous = self.capacity - offset;

        let (len, status) = if exact {
            if requested > contiguous && requested - contiguous > self.foot {
                return Err(RingError::FootBufferTooSmall {
                    needed: requested - contiguous,
                    available: self.foot,
                });
            }
            (requested, GrantStatus::Complete)
        } else {
            let len = requested.min(free).min(contiguous);
            let status = if len == requested {
                GrantStatus::Complete
            } else if len == contiguous {
                GrantStatus::Wrapped
            } else {
                GrantStatus::Partial
            };
            (len, status)
        };

        Ok((
            GrantSpan { offset, len },
            Grant {
                len,
                requested,
                status,
            },
        ))
    }

    fn acquire_read(&self, requested: usize) -> Result<(GrantSpan, Grant)> {
        let until_attr = self
            .attrs
            .front()
            .map(|attr| (attr.position - self.read_pos) as usize);
        if until_attr == Some(0) {
            return Err(RingError::PendingAttribute);
        }
        let available = self.used();
        if available == 0 {
            return Err(RingError::Empty);
        }
        let offset = self.physical(self.read_pos);
        let contiguous = self.capacity - offset;
        let len = requested
            .min(available)
            .min(contiguous)
            .min(until_attr.unwrap_or(usize::MAX));

        let status = if len == requested {
            GrantStatus::Complete
        } else if Some(len) == until_attr {
            GrantStatus::AttributePending
        } else if len == contiguous && contiguous < available {
            GrantStatus::Wrapped
        } else {
            GrantStatus::Partial
        };

        Ok((
            GrantSpan { offset, len },
            Grant {
                len,
                requested,
                status,
            },
        ))
    }

    pub(crate) fn grant_bytes(&self, role: Role) -> Result<&[u8]> {
        let span = self.endpoint(role).grant.ok_or(RingError::NoGrant)?;
        Ok(&self.data[span.offset..span.offset + span.len])
    }

    pub(crate) fn grant_bytes_mut(&mut self, role: Role) -> Result<&mut [u8]> {
        let span = self.endpoint(role).grant.ok_or(RingError::NoGrant)?;
        Ok(&mut self.data[span.offset..span.offset + span.len])
    }

    pub(crate) fn release(&mut self, role: Role, size: usize) -> Result<()> {
        let span = self.endpoint(role).grant.ok_or(RingError::NoGrant)?;
        if size > span.len {
            return Err(RingError::InvalidRelease {
                requested: size,
                outstanding: span.len,
            });
        }

        match role {
            Role::Writer => {
                // Bytes laid out in the foot region belong at the buffer start.
                let end = span.offset + size;
                if end > self.capacity {
                    let start = span.offset.max(self.capacity);
                    self.data
                        .copy_within(start..end, start - self.capacity);
                }
                self.write_pos += size as u64;
            }
            Role::Reader => {
                self.read_pos += size as u64;
            }
        }

        let remaining = span.len - size;
        self.endpoint_mut(role).grant = (remaining > 0).then_some(GrantSpan {
            offset: span.offset + size,
            len: remaining,
        });
        Ok(())
    }

    pub(crate) fn cancel(&mut self, role: Role) {
        self.endpoint_mut(role).grant = None;
    }

    pub(crate) fn push_attribute(
        &mut self,
        kind: u16,
        param: u32,
        payload: Option<Bytes>,
    ) -> Result<()> {
        if self.writer.grant.is_some() {
            return Err(RingError::WrongState("attribute set with grant outstanding"));
        }
        if payload.is_some() {
            let duplicate = self
                .attrs
                .back()
                .is_some_and(|last| last.position == self.write_pos && last.payload.is_some());
            if duplicate {
                return Err(RingError::WrongState(
                    "variable attribute already queued at this position",
                ));
            }
        }

        let attr = RawAttribute {
            position: self.write_pos,
            kind,
            param,
            payload,
        };
        if self.attr_bytes + attr.cost() > self.attr_capacity {
            return Err(RingError::AttributeBufferFull {
                used: self.attr_bytes,
                capacity: self.attr_capacity,
            });
        }
        self.attr_bytes += attr.cost();
        self.attrs.push_back(attr);
        Ok(())
    }

    fn head_attribute(&self) -> Result<&RawAttribute> {
        let head = self.attrs.front().ok_or(RingError::NoAttribute)?;
        if head.position > self.read_pos {
            return Err(RingError::PendingData);
        }
        Ok(head)
    }

    fn pop_attribute(&mut self) -> Option<RawAttribute> {
        let attr = self.attrs.pop_front()?;
        self.attr_bytes -= attr.cost();
        Some(attr)
    }

    pub(crate) fn take_fixed(&mut self) -> Result<(u16, u32)> {
        if self.head_attribute()?.payload.is_some() {
            return Err(RingError::VariableAttribute);
        }
        let attr = self.pop_attribute().ok_or(RingError::NoAttribute)?;
        Ok((attr.kind, attr.param))
    }

    pub(crate) fn take_variable(&mut self, capacity: usize) -> Result<(u16, u32, Bytes)> {
        let head = self.head_attribute()?;
        let size = match &head.payload {
            Some(payload) => payload.len(),
            None => return Err(RingError::FixedAttribute),
        };
        if size > capacity {
            return Err(RingError::OversizedPayload { size, capacity });
        }
        let attr = self.pop_attribute().ok_or(RingError::NoAttribute)?;
        Ok((attr.kind, attr.param, attr.payload.unwrap_or_default()))
    }

    pub(crate) fn register_notifier(
        &mut self,
        role: Role,
        mode: NotifyMode,
        watermark: usize,
        callback: NotifyCallback,
    ) -> Result<()> {
        if watermark > self.capacity {
            return Err(RingError::InvalidWatermark {
                watermark,
                capacity: self.capacity,
            });
        }
        let endpoint = self.endpoint_mut(role);
        if !endpoint.attached {
            return Err(RingError::Closed);
        }
        endpoint.notifier = Some(Notifier {
            mode,
            watermark,
            armed: true,
            callback,
        });
        Ok(())
    }

    fn watermark_reached(&self, role: Role, watermark: usize) -> bool {
        let threshold = watermark.max(1);
        match role {
            Role::Writer => self.free() >= threshold,
            Role::Reader => self.used() >= threshold || !self.attrs.is_empty(),
        }
    }

    /// Disarm and return the callback of `role` if its watermark condition holds.
    pub(crate) fn take_triggered(&mut self, role: Role) -> Option<NotifyCallback> {
        let watermark = match &self.endpoint(role).notifier {
            Some(notifier) if notifier.armed => notifier.watermark,
            _ => return None,
        };
        if !self.watermark_reached(role, watermark) {
            return None;
        }
        let notifier = self.endpoint_mut(role).notifier.as_mut()?;
        if notifier.mode == NotifyMode::Once {
            notifier.armed = false;
        }
        Some(notifier.callback.clone())
    }

    /// Callback registered by the endpoint opposite to `from`.
    pub(crate) fn peer_callback(&self, from: Role) -> Option<NotifyCallback> {
        let peer = self.endpoint(from.peer());
        if !peer.attached {
            return None;
        }
        peer.notifier.as_ref().map(|n| n.callback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(capacity: usize, foot: usize) -> SegmentState {
        let mut state = SegmentState::new(&RingAttrs {
            data_buf_size: capacity,
            foot_buf_size: foot,
            attr_buf_size: 64,
        });
        state.attach(Role::Writer);
        state.attach(Role::Reader);
        state
    }

    fn write(state: &mut SegmentState, bytes: &[u8]) {
        let grant = state.acquire(Role::Writer, bytes.len(), false).unwrap();
        assert_eq!(grant.len, bytes.len());
        state
            .grant_bytes_mut(Role::Writer)
            .unwrap()
            .copy_from_slice(bytes);
        state.release(Role::Writer, bytes.len()).unwrap();
    }

    #[test]
    fn writer_grant_shortened_at_physical_end() {
        let mut state = state(16, 0);
        write(&mut state, &[1; 12]);
        let grant = state.acquire(Role::Reader, 12, false).unwrap();
        state.release(Role::Reader, grant.len).unwrap();

        let grant = state.acquire(Role::Writer, 8, false).unwrap();
        assert_eq!(grant.len, 4);
        assert_eq!(grant.status, GrantStatus::Wrapped);
    }

    #[test]
    fn exact_grant_uses_foot_and_mirrors_to_start() {
        let mut state = state(16, 8);
        write(&mut state, &[0; 12]);
        let grant = state.acquire(Role::Reader, 12, false).unwrap();
        state.release(Role::Reader, grant.len).unwrap();

        let grant = state.acquire(Role::Writer, 8, true).unwrap();
        assert_eq!(grant.len, 8);
        state
            .grant_bytes_mut(Role::Writer)
            .unwrap()
            .copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        state.release(Role::Writer, 8).unwrap();

        let first = state.acquire(Role::Reader, 8, false).unwrap();
        assert_eq!(first.status, GrantStatus::Wrapped);
        assert_eq!(state.grant_bytes(Role::Reader).unwrap(), &[1, 2, 3, 4]);
        state.release(Role::Reader, first.len).unwrap();

        state.acquire(Role::Reader, 4, false).unwrap();
        assert_eq!(state.grant_bytes(Role::Reader).unwrap(), &[5, 6, 7, 8]);
    }

    #[test]
    fn exact_grant_without_foot_room_is_fatal() {
        let mut state = state(16, 2);
        write(&mut state, &[0; 12]);
        let grant = state.acquire(Role::Reader, 12, false).unwrap();
        state.release(Role::Reader, grant.len).unwrap();

        let err = state.acquire(Role::Writer, 8, true).unwrap_err();
        assert_eq!(
            err,
            RingError::FootBufferTooSmall {
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn reader_grant_stops_before_attribute() {
        let mut state = state(32, 0);
        write(&mut state, &[7; 5]);
        state.push_attribute(3, 0, None).unwrap();
        write(&mut state, &[9; 5]);

        let grant = state.acquire(Role::Reader, 10, false).unwrap();
        assert_eq!(grant.len, 5);
        assert_eq!(grant.status, GrantStatus::AttributePending);
        state.release(Role::Reader, 5).unwrap();

        assert_eq!(
            state.acquire(Role::Reader, 10, false).unwrap_err(),
            RingError::PendingAttribute
        );
        assert_eq!(state.take_fixed().unwrap(), (3, 0));
        assert_eq!(state.acquire(Role::Reader, 10, false).unwrap().len, 5);
    }

    #[test]
    fn duplicate_variable_attribute_is_wrong_state() {
        let mut state = state(32, 0);
        state
            .push_attribute(0, 0, Some(Bytes::from_static(&[1, 0, 0, 0])))
            .unwrap();
        let err = state
            .push_attribute(0, 0, Some(Bytes::from_static(&[1, 0, 0, 0])))
            .unwrap_err();
        assert!(matches!(err, RingError::WrongState(_)));

        write(&mut state, &[1]);
        state
            .push_attribute(0, 0, Some(Bytes::from_static(&[2, 0, 0, 0])))
            .unwrap();
    }

    #[test]
    fn attribute_accounting_and_capacity() {
        let mut state = state(32, 0);
        for _ in 0..8 {
            state.push_attribute(1, 0, None).unwrap();
        }
        assert_eq!(state.attr_bytes, 64);
        assert!(matches!(
            state.push_attribute(1, 0, None),
            Err(RingError::AttributeBufferFull { .. })
        ));
        state.take_fixed().unwrap();
        assert_eq!(state.attr_bytes, 56);
    }

    #[test]
    fn oversized_variable_payload_stays_queued() {
        let mut state = state(32, 0);
        state
            .push_attribute(0, 0, Some(Bytes::from_static(&[0; 8])))
            .unwrap();
        assert_eq!(
            state.take_variable(4).unwrap_err(),
            RingError::OversizedPayload {
                size: 8,
                capacity: 4
            }
        );
        assert_eq!(state.take_fixed().unwrap_err(), RingError::VariableAttribute);
        let (_, _, payload) = state.take_variable(8).unwrap();
        assert_eq!(payload.len(), 8);
    }
}
