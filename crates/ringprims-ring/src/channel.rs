use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::error::{Result, RingError};
use crate::flags::{NotifyMode, OpenFlags, Role};
use crate::segment::Segment;

/// Message code delivered to a notifier callback.
///
/// Watermark wakes carry `0`; peer messages carry the code passed to
/// [`RingChannel::send_notify`].
pub type NotifyMsg = u16;

/// Notifier callback, invoked outside the segment lock from whichever
/// thread changed the segment state.
pub type NotifyCallback = Arc<dyn Fn(NotifyMsg) + Send + Sync>;

/// Why a grant is shorter than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStatus {
    /// The full requested size was granted.
    Complete,
    /// Limited by available data or free space.
    Partial,
    /// Limited by the physical end of the buffer; the rest follows at the start.
    Wrapped,
    /// Reader only: limited by an attribute queued after the granted bytes.
    AttributePending,
}

/// A contiguous region handed out by [`RingChannel::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Granted bytes.
    pub len: usize,
    /// Bytes the caller asked for.
    pub requested: usize,
    pub status: GrantStatus,
}

impl Grant {
    /// True when fewer bytes than requested were granted.
    pub fn is_short(&self) -> bool {
        self.len < self.requested
    }
}

/// Result of closing a writer endpoint after waiting for its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Every queued attribute was consumed by the reader (or none was queued).
    Drained,
    /// The wait ended with attribute bytes still queued.
    Abandoned { pending_attr_bytes: usize },
}

/// One endpoint of a named ring segment.
///
/// At most one grant is outstanding per endpoint. Dropping the endpoint
/// detaches it and discards any outstanding grant.
pub struct RingChannel {
    segment: Arc<Segment>,
    role: Role,
    flags: OpenFlags,
}

impl RingChannel {
    pub(crate) fn attach(segment: Arc<Segment>, role: Role, flags: OpenFlags) -> Result<Self> {
        if !segment.lock().attach(role) {
            return Err(RingError::AlreadyOpen {
                name: segment.name.clone(),
                role,
            });
        }
        debug!(ring = %segment.name, %role, flags = flags.bits(), "ring endpoint attached");
        Ok(Self {
            segment,
            role,
            flags,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.segment.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Data capacity in bytes (foot region excluded).
    pub fn capacity(&self) -> usize {
        self.segment.lock().capacity()
    }

    /// Committed bytes the reader has not released yet.
    pub fn valid_size(&self) -> usize {
        self.segment.lock().used()
    }

    /// Free bytes available to the writer.
    pub fn empty_size(&self) -> usize {
        self.segment.lock().free()
    }

    /// Attribute bytes queued and not yet consumed by the reader.
    pub fn valid_attr_size(&self) -> usize {
        self.segment.lock().attr_bytes
    }

    /// Whether the opposite endpoint is currently attached.
    pub fn peer_attached(&self) -> bool {
        self.segment.lock().endpoint(self.role.peer()).attached
    }

    /// Whether this endpoint holds an acquired-but-unreleased region.
    pub fn has_grant(&self) -> bool {
        self.segment.lock().has_grant(self.role)
    }

    /// Acquire up to `size` contiguous bytes.
    ///
    /// A writer grant is free space to fill; a reader grant is committed
    /// data to consume. Short grants are valid and carry the reason in
    /// [`Grant::status`]. `Empty`, `Full` and `PendingAttribute` report
    /// that nothing could be granted.
    pub fn acquire(&mut self, size: usize) -> Result<Grant> {
        let exact = self.role == Role::Writer && self.flags.contains(OpenFlags::NEED_EXACT_SIZE);
        let grant = self.segment.lock().acquire(self.role, size, exact)?;
        trace!(ring = %self.segment.name, role = %self.role, requested = size, granted = grant.len, status = ?grant.status, "acquired");
        Ok(grant)
    }

    /// Read access to the outstanding grant.
    pub fn with_grant<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.segment.lock();
        Ok(f(state.grant_bytes(self.role)?))
    }

    /// Write access to the outstanding grant (writer only).
    pub fn with_grant_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.require(Role::Writer)?;
        let mut state = self.segment.lock();
        Ok(f(state.grant_bytes_mut(self.role)?))
    }

    /// Commit (writer) or retire (reader) the first `size` bytes of the grant.
    ///
    /// Any remainder stays outstanding until released or cancelled.
    pub fn release(&mut self, size: usize) -> Result<()> {
        let triggered = {
            let mut state = self.segment.lock();
            state.release(self.role, size)?;
            state.take_triggered(self.role.peer())
        };
        trace!(ring = %self.segment.name, role = %self.role, size, "released");
        fire(triggered, 0);
        Ok(())
    }

    /// Discard the unreleased remainder of the outstanding grant.
    pub fn cancel(&mut self) -> Result<()> {
        self.segment.lock().cancel(self.role);
        Ok(())
    }

    /// Queue a fixed attribute at the current write position.
    pub fn set_attribute(&mut self, kind: u16, param: u32) -> Result<()> {
        self.push_attribute(kind, param, None)
    }

    /// Queue a variable attribute at the current write position.
    pub fn set_vattribute(&mut self, kind: u16, param: u32, payload: Bytes) -> Result<()> {
        self.push_attribute(kind, param, Some(payload))
    }

    fn push_attribute(&mut self, kind: u16, param: u32, payload: Option<Bytes>) -> Result<()> {
        self.require(Role::Writer)?;
        let triggered = {
            let mut state = self.segment.lock();
            state.push_attribute(kind, param, payload)?;
            state.take_triggered(Role::Reader)
        };
        trace!(ring = %self.segment.name, kind, param, "attribute queued");
        fire(triggered, 0);
        Ok(())
    }

    /// Consume the fixed attribute at the read position.
    ///
    /// Returns `VariableAttribute` if the head carries a payload; use
    /// [`get_vattribute`](Self::get_vattribute) for that.
    pub fn get_attribute(&mut self) -> Result<(u16, u32)> {
        self.require(Role::Reader)?;
        let (attr, triggered) = {
            let mut state = self.segment.lock();
            let attr = state.take_fixed()?;
            (attr, state.take_triggered(Role::Writer))
        };
        self.segment.notify_drained();
        fire(triggered, 0);
        Ok(attr)
    }

    /// Consume the variable attribute at the read position.
    ///
    /// `capacity` is the caller's payload buffer size in bytes; a larger
    /// payload yields `OversizedPayload` and stays queued.
    pub fn get_vattribute(&mut self, capacity: usize) -> Result<(u16, u32, Bytes)> {
        self.require(Role::Reader)?;
        let (attr, triggered) = {
            let mut state = self.segment.lock();
            let attr = state.take_variable(capacity)?;
            (attr, state.take_triggered(Role::Writer))
        };
        self.segment.notify_drained();
        fire(triggered, 0);
        Ok(attr)
    }

    /// Register `callback` and arm its watermark trigger.
    ///
    /// A `Once` trigger fires at most once per call. The condition is
    /// checked immediately, so a watermark already reached fires at once.
    pub fn set_notifier(
        &mut self,
        mode: NotifyMode,
        watermark: usize,
        callback: NotifyCallback,
    ) -> Result<()> {
        let triggered = {
            let mut state = self.segment.lock();
            state.register_notifier(self.role, mode, watermark, callback)?;
            state.take_triggered(self.role)
        };
        fire(triggered, 0);
        Ok(())
    }

    /// Deliver `msg` to the opposite endpoint's notifier callback.
    pub fn send_notify(&self, msg: NotifyMsg) -> Result<()> {
        let callback = self
            .segment
            .lock()
            .peer_callback(self.role)
            .ok_or(RingError::PeerNotReady)?;
        trace!(ring = %self.segment.name, role = %self.role, msg, "notify sent");
        callback(msg);
        Ok(())
    }

    /// Detach from the segment, discarding any outstanding grant.
    pub fn close(self) -> Result<()> {
        // Detach happens in Drop.
        Ok(())
    }

    /// Writer close: wait until the reader has consumed every queued
    /// attribute (or detached), bounded by `timeout`, then detach.
    pub fn close_after_drain(self, timeout: Duration) -> Result<CloseOutcome> {
        self.require(Role::Writer)?;
        let pending = self.segment.wait_attrs_drained(Instant::now() + timeout);
        let outcome = if pending == 0 {
            CloseOutcome::Drained
        } else {
            warn!(ring = %self.segment.name, pending_attr_bytes = pending, "closing with unconsumed attributes");
            CloseOutcome::Abandoned {
                pending_attr_bytes: pending,
            }
        };
        self.close()?;
        Ok(outcome)
    }

    fn require(&self, expected: Role) -> Result<()> {
        if self.role == expected {
            Ok(())
        } else {
            Err(RingError::WrongRole { expected })
        }
    }
}

impl Drop for RingChannel {
    fn drop(&mut self) {
        self.segment.lock().detach(self.role);
        self.segment.notify_drained();
        debug!(ring = %self.segment.name, role = %self.role, "ring endpoint detached");
    }
}

impl std::fmt::Debug for RingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingChannel")
            .field("name", &self.segment.name)
            .field("role", &self.role)
            .field("flags", &self.flags)
            .finish()
    }
}

fn fire(callback: Option<NotifyCallback>, msg: NotifyMsg) {
    if let Some(callback) = callback {
        callback(msg);
    }
}
