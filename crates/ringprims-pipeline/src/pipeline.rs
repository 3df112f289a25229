use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;

use ringprims_attr::{
    AttrError, AttrType, AttributeChannel, FixedAttribute, NOTIFY_DATA_END, NOTIFY_DATA_START,
    VARIABLE_RECORD_SIZE,
};
use ringprims_ring::{CloseOutcome, OpenFlags, RingChannel, RingError, RingRegistry, Role};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::StreamConfig;
use crate::error::{PipelineError, Result};
use crate::notify::{NotificationBridge, ShutdownSignal, TransferFlags};
use crate::state::{TransferPhase, TransferState};
use crate::transform::Transform;

/// Counters reported when a pipeline stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Completed receive/send cycles.
    pub cycles: u64,
    pub records_received: u64,
    pub bytes_received: u64,
    /// Received bytes that did not fit the scratch buffer.
    pub bytes_dropped: u64,
    pub records_sent: u64,
    pub bytes_sent: u64,
    /// Granted outbound bytes cancelled past the end of a record.
    pub bytes_cancelled: u64,
    /// Outbound attribute bytes the peer had not consumed at close.
    pub attr_bytes_abandoned: usize,
    /// Whether the remote side requested the stop.
    pub remote_shutdown: bool,
}

/// Split a writer grant at the end of a record.
///
/// Returns `(release, cancel)`: the bytes to commit and the bytes to
/// discard so that exactly `total` bytes are sent.
pub fn settle_grant(sent: usize, total: usize, granted: usize) -> (usize, usize) {
    let remaining = total.saturating_sub(sent);
    if granted > remaining {
        (remaining, granted - remaining)
    } else {
        (granted, 0)
    }
}

/// One duplex stream: receive a record, transform it, send it back.
pub struct StreamPipeline {
    config: StreamConfig,
    registry: RingRegistry,
    shutdown: ShutdownSignal,
    transform: Box<dyn Transform>,
}

impl StreamPipeline {
    pub fn new(config: StreamConfig, registry: RingRegistry, shutdown: ShutdownSignal) -> Self {
        let transform = Box::new(config.transform.build());
        Self {
            config,
            registry,
            shutdown,
            transform,
        }
    }

    /// Replace the configured scale transform.
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run until local or remote shutdown, then tear down.
    ///
    /// Returns `Ok` with the counters when the pipeline stopped because
    /// shutdown was requested; any fatal fault is returned after teardown.
    pub fn run(self) -> Result<PipelineStats> {
        self.config.validate()?;
        let Some(mut info) = TransferInfo::create(self)? else {
            return Ok(PipelineStats::default());
        };
        let result = info.execute();
        if let Err(err) = &result {
            error!(stream = %info.config.name, code = err.code(), error = %err, "pipeline failed");
        }
        let stats = info.delete();
        result.map(|()| stats)
    }
}

impl std::fmt::Debug for StreamPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Outcome of consuming one inbound attribute.
enum Marker {
    None,
    End,
    Shutdown,
}

/// Everything one running pipeline owns.
struct TransferInfo {
    config: StreamConfig,
    registry: RingRegistry,
    shutdown: ShutdownSignal,
    transform: Box<dyn Transform>,
    inbound: RingChannel,
    outbound: RingChannel,
    attrs: AttributeChannel,
    reader: NotificationBridge,
    writer: NotificationBridge,
    scratch: Vec<u8>,
    /// Bytes of `scratch` holding the last received record.
    source_len: usize,
    state: TransferState,
    stats: PipelineStats,
}

fn allocate_scratch(size: usize) -> Result<Vec<u8>> {
    let mut scratch = Vec::new();
    scratch
        .try_reserve_exact(size)
        .map_err(|_| PipelineError::Allocation { size })?;
    scratch.resize(size, 0);
    Ok(scratch)
}

impl TransferInfo {
    /// Allocate scratch, create the outbound ring and open both endpoints.
    ///
    /// `None` means shutdown arrived before the inbound ring appeared.
    fn create(pipeline: StreamPipeline) -> Result<Option<Self>> {
        let StreamPipeline {
            config,
            registry,
            shutdown,
            transform,
        } = pipeline;

        let scratch = allocate_scratch(config.record_size)?;
        registry.create(&config.outbound, config.outbound_attrs())?;

        let opened = Self::open(&config, &registry, &shutdown);
        let (outbound, inbound) = match opened {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                let _ = registry.delete(&config.outbound);
                return Ok(None);
            }
            Err(err) => {
                let _ = registry.delete(&config.outbound);
                return Err(err);
            }
        };

        let flags = Arc::new(TransferFlags::new());
        let writer = NotificationBridge::new(Arc::clone(&flags), config.poll_interval());
        let mut reader = NotificationBridge::new(flags, config.poll_interval());
        reader.link(writer.waker());
        shutdown.register(reader.waker());
        shutdown.register(writer.waker());

        let mut info = Self {
            attrs: AttributeChannel::new(config.max_attr_words),
            state: TransferState::new(config.record_size),
            config,
            registry,
            shutdown,
            transform,
            inbound,
            outbound,
            reader,
            writer,
            scratch,
            source_len: 0,
            stats: PipelineStats::default(),
        };
        info.writer.arm(&mut info.outbound, info.config.chunk())?;
        info.reader.arm(&mut info.inbound, 0)?;

        info!(
            stream = %info.config.name,
            inbound = %info.config.inbound,
            outbound = %info.config.outbound,
            record_size = info.config.record_size,
            send_size = info.config.send_size,
            "pipeline started"
        );
        Ok(Some(info))
    }

    fn open(
        config: &StreamConfig,
        registry: &RingRegistry,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<(RingChannel, RingChannel)>> {
        let stop = || shutdown.is_set();
        let Some(outbound) = registry.open_with_retry(
            &config.outbound,
            Role::Writer,
            OpenFlags::CACHE_COHERENT | OpenFlags::NEED_EXACT_SIZE,
            config.open_retry(),
            stop,
        )?
        else {
            return Ok(None);
        };
        let Some(inbound) = registry.open_with_retry(
            &config.inbound,
            Role::Reader,
            OpenFlags::CACHE_COHERENT,
            config.open_retry(),
            stop,
        )?
        else {
            return Ok(None);
        };
        Ok(Some((outbound, inbound)))
    }

    fn stopping(&self) -> bool {
        self.reader.should_stop(&self.shutdown)
    }

    fn enter(&mut self, phase: TransferPhase) {
        self.state.enter(&self.config.name, phase);
    }

    fn execute(&mut self) -> Result<()> {
        while !self.stopping() {
            self.enter(TransferPhase::AwaitingStart);
            if self.await_start()?.is_break() {
                break;
            }
            self.enter(TransferPhase::ReceivingData);
            if self.receive_record()?.is_break() {
                break;
            }
            self.enter(TransferPhase::Draining);
            self.drain();

            self.enter(TransferPhase::SendingStart);
            if self.send_start()?.is_break() {
                break;
            }
            self.enter(TransferPhase::SendingData);
            if self.send_data()?.is_break() {
                break;
            }
            self.enter(TransferPhase::SendingEnd);
            if self.send_end()?.is_break() {
                break;
            }
            self.stats.cycles += 1;
            self.enter(TransferPhase::Idle);
            thread::yield_now();
        }
        self.enter(TransferPhase::Idle);
        Ok(())
    }

    fn await_start(&mut self) -> Result<ControlFlow<()>> {
        loop {
            if self.stopping() {
                return Ok(ControlFlow::Break(()));
            }
            // A queued attribute may be a start or shutdown marker whose
            // notification has not arrived yet.
            if self.reader.flags().take_data_start() || self.inbound.valid_attr_size() > 0 {
                return self.confirm_start();
            }
            self.reader.wait(&self.shutdown);
        }
    }

    /// Consume inbound attributes up to and including DataStart.
    fn confirm_start(&mut self) -> Result<ControlFlow<()>> {
        loop {
            if self.stopping() {
                return Ok(ControlFlow::Break(()));
            }
            match self.attrs.get_fixed(&mut self.inbound) {
                Ok(FixedAttribute {
                    kind: AttrType::DataStart,
                    ..
                }) => return Ok(ControlFlow::Continue(())),
                Ok(FixedAttribute {
                    kind: AttrType::RemoteShutdown,
                    ..
                }) => {
                    self.remote_shutdown();
                    return Ok(ControlFlow::Break(()));
                }
                Ok(FixedAttribute { kind, .. }) => {
                    debug!(stream = %self.config.name, %kind, "skipping attribute before start");
                }
                Err(err) if err.is_variable_pending() => self.read_variable()?,
                Err(AttrError::UnknownType(code)) => {
                    warn!(stream = %self.config.name, code, "unknown attribute type");
                }
                Err(AttrError::Ring(RingError::PendingData)) => self.discard_stray_data()?,
                Err(err) if err.is_transient() => {
                    self.reader.wait(&self.shutdown);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn discard_stray_data(&mut self) -> Result<()> {
        let capacity = self.inbound.capacity();
        match self.inbound.acquire(capacity) {
            Ok(grant) => {
                self.inbound.release(grant.len)?;
                self.stats.bytes_dropped += grant.len as u64;
                warn!(stream = %self.config.name, bytes = grant.len, "discarded data outside a record");
                Ok(())
            }
            Err(err) if err.is_transient() || err == RingError::PendingAttribute => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn receive_record(&mut self) -> Result<ControlFlow<()>> {
        let capacity = self.inbound.capacity();
        loop {
            if self.stopping() {
                return Ok(ControlFlow::Break(()));
            }
            let request = self.state.next_request(capacity);
            match self.inbound.acquire(request) {
                Ok(grant) => {
                    if grant.is_short() {
                        trace!(stream = %self.config.name, len = grant.len, status = ?grant.status, "short grant");
                    }
                    self.store_grant(grant.len)?;
                }
                Err(RingError::PendingAttribute) => match self.read_attribute()? {
                    Marker::None => {}
                    Marker::End => return Ok(ControlFlow::Continue(())),
                    Marker::Shutdown => return Ok(ControlFlow::Break(())),
                },
                Err(err) if err.is_transient() => {
                    self.reader.arm(&mut self.inbound, 0)?;
                    self.reader.wait(&self.shutdown);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn store_grant(&mut self, len: usize) -> Result<()> {
        let Self {
            inbound,
            scratch,
            state,
            config,
            ..
        } = self;
        let dropped = inbound.with_grant(|bytes| state.store(&config.name, scratch, bytes))?;
        inbound.release(len)?;
        self.stats.bytes_received += len as u64;
        self.stats.bytes_dropped += dropped as u64;
        trace!(stream = %self.config.name, len, remaining = self.state.remaining(), "received");
        Ok(())
    }

    fn read_attribute(&mut self) -> Result<Marker> {
        match self.attrs.get_fixed(&mut self.inbound) {
            Ok(FixedAttribute { kind, .. }) => match kind {
                AttrType::DataEnd => Ok(Marker::End),
                AttrType::RemoteShutdown => {
                    self.remote_shutdown();
                    Ok(Marker::Shutdown)
                }
                AttrType::DataStart => {
                    debug!(stream = %self.config.name, "data start inside a record, ignoring");
                    Ok(Marker::None)
                }
            },
            Err(err) if err.is_variable_pending() => {
                self.read_variable()?;
                Ok(Marker::None)
            }
            Err(AttrError::UnknownType(code)) => {
                warn!(stream = %self.config.name, code, "unknown attribute type");
                Ok(Marker::None)
            }
            Err(err) if err.is_transient() => Ok(Marker::None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_variable(&mut self) -> Result<()> {
        match self.attrs.get_variable(&mut self.inbound) {
            Ok(attr) if attr.kind == VARIABLE_RECORD_SIZE => {
                if let Some(size) = attr.first_word() {
                    self.state.set_record_size(size as usize);
                    debug!(stream = %self.config.name, size, "record size");
                }
                Ok(())
            }
            Ok(attr) => {
                debug!(stream = %self.config.name, kind = attr.kind, "ignoring variable attribute");
                Ok(())
            }
            Err(err) if err.is_transient() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn remote_shutdown(&self) {
        info!(stream = %self.config.name, "remote shutdown");
        self.reader.flags().set_remote_shutdown();
    }

    fn drain(&mut self) {
        if self.state.dropped() > 0 {
            debug!(
                stream = %self.config.name,
                dropped = self.state.dropped(),
                "record truncated"
            );
        }
        self.source_len = self.state.received();
        self.state.reset_receive();
        self.reader.flags().take_data_end();
        self.stats.records_received += 1;
    }

    /// Run `op` until it succeeds, suspending on transient failures.
    ///
    /// `None` means shutdown interrupted the retries.
    fn retry<T>(
        bridge: &NotificationBridge,
        shutdown: &ShutdownSignal,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<Option<T>> {
        loop {
            if bridge.should_stop(shutdown) {
                return Ok(None);
            }
            match op() {
                Ok(value) => return Ok(Some(value)),
                Err(err) if err.is_transient() => {
                    bridge.wait(shutdown);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Set a fixed attribute, then notify the peer with `msg`.
    fn send_marker(&mut self, kind: AttrType, msg: u16) -> Result<ControlFlow<()>> {
        let Self {
            outbound,
            attrs,
            writer,
            shutdown,
            ..
        } = self;
        let set = Self::retry(writer, shutdown, || {
            attrs.set_fixed(outbound, kind).map_err(PipelineError::from)
        })?;
        if set.is_none() {
            return Ok(ControlFlow::Break(()));
        }
        let sent = Self::retry(writer, shutdown, || {
            outbound.send_notify(msg).map_err(PipelineError::from)
        })?;
        Ok(match sent {
            Some(()) => ControlFlow::Continue(()),
            None => ControlFlow::Break(()),
        })
    }

    fn send_start(&mut self) -> Result<ControlFlow<()>> {
        self.send_marker(AttrType::DataStart, NOTIFY_DATA_START)
    }

    fn send_data(&mut self) -> Result<ControlFlow<()>> {
        let total = self.config.send_size;
        let chunk = self.config.chunk();
        // Validated to fit.
        let size_word = total as u32;
        let mut sent = 0;

        while sent < total {
            if self.stopping() {
                return Ok(ControlFlow::Break(()));
            }
            match self
                .attrs
                .set_variable(&mut self.outbound, VARIABLE_RECORD_SIZE, &[size_word])
            {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    trace!(stream = %self.config.name, error = %err, "size attribute skipped");
                }
                Err(err) => return Err(err.into()),
            }

            match self.outbound.acquire(chunk) {
                Ok(grant) => {
                    let Self {
                        outbound,
                        scratch,
                        source_len,
                        transform,
                        ..
                    } = self;
                    let source = &scratch[..*source_len];
                    outbound.with_grant_mut(|buf| {
                        fill_from(buf, source, sent);
                        transform.apply(buf);
                    })?;

                    let (release, cancel) = settle_grant(sent, total, grant.len);
                    self.outbound.release(release)?;
                    if cancel > 0 {
                        self.outbound.cancel()?;
                        self.stats.bytes_cancelled += cancel as u64;
                    }
                    sent += release;
                    trace!(stream = %self.config.name, release, cancel, sent, "sent");
                }
                Err(err) if err.is_transient() => {
                    self.writer.arm(&mut self.outbound, chunk)?;
                    self.writer.wait(&self.shutdown);
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.stats.bytes_sent += sent as u64;
        Ok(ControlFlow::Continue(()))
    }

    fn send_end(&mut self) -> Result<ControlFlow<()>> {
        let flow = self.send_marker(AttrType::DataEnd, NOTIFY_DATA_END)?;
        if flow.is_continue() {
            self.stats.records_sent += 1;
        }
        Ok(flow)
    }

    /// Release everything: grants, endpoints, the outbound name, scratch.
    fn delete(self) -> PipelineStats {
        let TransferInfo {
            config,
            registry,
            mut inbound,
            mut outbound,
            reader,
            scratch,
            mut stats,
            ..
        } = self;

        let _ = inbound.cancel();
        let _ = outbound.cancel();
        match outbound.close_after_drain(config.drain_timeout()) {
            Ok(CloseOutcome::Drained) => {}
            Ok(CloseOutcome::Abandoned { pending_attr_bytes }) => {
                stats.attr_bytes_abandoned = pending_attr_bytes;
            }
            Err(err) => warn!(stream = %config.name, error = %err, "outbound close failed"),
        }
        if let Err(err) = inbound.close() {
            warn!(stream = %config.name, error = %err, "inbound close failed");
        }
        if let Err(err) = registry.delete(&config.outbound) {
            warn!(stream = %config.name, error = %err, "outbound delete failed");
        }
        drop(scratch);

        stats.remote_shutdown = reader.flags().remote_shutdown();
        info!(
            stream = %config.name,
            cycles = stats.cycles,
            bytes_received = stats.bytes_received,
            bytes_sent = stats.bytes_sent,
            "pipeline stopped"
        );
        stats
    }
}

/// Fill `buf` cyclically from `source`, starting at record offset `offset`.
fn fill_from(buf: &mut [u8], source: &[u8], offset: usize) {
    if source.is_empty() {
        buf.fill(0);
        return;
    }
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = source[(offset + i) % source.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_cancels_past_total() {
        assert_eq!(settle_grant(850, 1000, 300), (150, 150));
        assert_eq!(settle_grant(0, 1000, 300), (300, 0));
        assert_eq!(settle_grant(700, 1000, 300), (300, 0));
    }

    #[test]
    fn settle_sums_to_total() {
        let total = 1000;
        let mut sent = 0;
        let mut cancelled = 0;
        while sent < total {
            let (release, cancel) = settle_grant(sent, total, 300);
            sent += release;
            cancelled += cancel;
        }
        assert_eq!(sent, 1000);
        assert_eq!(cancelled, 200);
    }

    #[test]
    fn fill_wraps_source() {
        let mut buf = [0u8; 5];
        fill_from(&mut buf, &[1, 2, 3], 1);
        assert_eq!(buf, [2, 3, 1, 2, 3]);
    }

    #[test]
    fn fill_without_source_is_zero() {
        let mut buf = [9u8; 3];
        fill_from(&mut buf, &[], 0);
        assert_eq!(buf, [0, 0, 0]);
    }

    #[test]
    fn scratch_allocation_is_sized() {
        let scratch = allocate_scratch(2048).unwrap();
        assert_eq!(scratch.len(), 2048);
    }

    #[test]
    fn absurd_scratch_size_fails_cleanly() {
        let err = allocate_scratch(usize::MAX).unwrap_err();
        assert!(matches!(err, PipelineError::Allocation { .. }));
    }
}
