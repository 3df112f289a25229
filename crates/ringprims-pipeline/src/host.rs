//! The remote domain, in-process.
//!
//! A [`HostPeer`] creates a stream's inbound ring, writes records into it
//! and reads the pipeline's processed records back from the outbound ring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use ringprims_attr::{
    AttrType, AttributeChannel, FixedAttribute, NOTIFY_DATA_END, NOTIFY_DATA_START,
    NOTIFY_REMOTE_SHUTDOWN, VARIABLE_RECORD_SIZE,
};
use ringprims_ring::{OpenFlags, RingChannel, RingError, RingRegistry, Role};
use tracing::debug;

use crate::config::StreamConfig;
use crate::error::{PipelineError, Result};
use crate::notify::{NotificationBridge, ShutdownSignal, TransferFlags};

/// Default bound on every blocking host operation.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(5);

/// What the host observed on the outbound ring, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEvent {
    DataStart,
    /// Variable attribute carrying the record size.
    RecordSize(u32),
    /// Consecutive data bytes.
    Data(usize),
    DataEnd,
}

/// One record read back from a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRecord {
    pub data: Bytes,
    pub events: Vec<RecordEvent>,
}

pub struct HostPeer {
    stream: String,
    registry: RingRegistry,
    inbound_name: String,
    writer: RingChannel,
    reader: RingChannel,
    attrs: AttributeChannel,
    writer_bridge: NotificationBridge,
    reader_bridge: NotificationBridge,
    /// Never triggered; host waits are bounded by `timeout` instead.
    idle: ShutdownSignal,
    timeout: Duration,
}

impl HostPeer {
    /// Create the stream's inbound ring and open the pipeline's outbound ring.
    ///
    /// Blocks (bounded by the default timeout) until the pipeline has
    /// created its outbound ring.
    pub fn attach(registry: &RingRegistry, config: &StreamConfig) -> Result<Self> {
        Self::attach_with_timeout(registry, config, DEFAULT_HOST_TIMEOUT)
    }

    pub fn attach_with_timeout(
        registry: &RingRegistry,
        config: &StreamConfig,
        timeout: Duration,
    ) -> Result<Self> {
        registry.create(&config.inbound, config.inbound_attrs())?;
        let writer = match registry.open(&config.inbound, Role::Writer, OpenFlags::CACHE_COHERENT) {
            Ok(writer) => writer,
            Err(err) => {
                let _ = registry.delete(&config.inbound);
                return Err(err.into());
            }
        };

        let deadline = Instant::now() + timeout;
        let opened = registry.open_with_retry(
            &config.outbound,
            Role::Reader,
            OpenFlags::CACHE_COHERENT,
            config.open_retry(),
            || Instant::now() >= deadline,
        );
        let mut reader = match opened {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                let _ = registry.delete(&config.inbound);
                return Err(PipelineError::Timeout(timeout));
            }
            Err(err) => {
                let _ = registry.delete(&config.inbound);
                return Err(err.into());
            }
        };

        let flags = Arc::new(TransferFlags::new());
        let writer_bridge = NotificationBridge::new(Arc::clone(&flags), config.poll_interval());
        let reader_bridge = NotificationBridge::new(flags, config.poll_interval());
        // Also the callback the pipeline's notifications are delivered to.
        reader_bridge.subscribe(&mut reader, 0)?;

        debug!(stream = %config.name, inbound = %config.inbound, outbound = %config.outbound, "host attached");
        Ok(Self {
            stream: config.name.clone(),
            registry: registry.clone(),
            inbound_name: config.inbound.clone(),
            writer,
            reader,
            attrs: AttributeChannel::new(config.max_attr_words),
            writer_bridge,
            reader_bridge,
            idle: ShutdownSignal::new(),
            timeout,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Send one record in grants as large as the ring allows.
    pub fn send_record(&mut self, data: &[u8]) -> Result<()> {
        self.send_record_in_grants(data, usize::MAX)
    }

    /// Send one record, writing at most `grant_size` bytes per grant.
    pub fn send_record_in_grants(&mut self, data: &[u8], grant_size: usize) -> Result<()> {
        let size_word = u32::try_from(data.len())
            .map_err(|_| PipelineError::Config(format!("record of {} bytes", data.len())))?;
        let deadline = Instant::now() + self.timeout;

        self.send_marker(AttrType::DataStart, NOTIFY_DATA_START, deadline)?;
        {
            let Self {
                writer,
                attrs,
                writer_bridge,
                idle,
                timeout,
                ..
            } = self;
            retry_until(writer_bridge, idle, deadline, *timeout, || {
                attrs
                    .set_variable(writer, VARIABLE_RECORD_SIZE, &[size_word])
                    .map_err(PipelineError::from)
            })?;
        }

        let capacity = self.writer.capacity();
        let mut offset = 0;
        while offset < data.len() {
            let want = (data.len() - offset).min(grant_size.max(1)).min(capacity);
            match self.writer.acquire(want) {
                Ok(grant) => {
                    let chunk = &data[offset..offset + grant.len];
                    self.writer.with_grant_mut(|buf| buf.copy_from_slice(chunk))?;
                    self.writer.release(grant.len)?;
                    offset += grant.len;
                }
                Err(err) if err.is_transient() => {
                    self.writer_bridge.arm(&mut self.writer, 1)?;
                    self.wait(Role::Writer, deadline)?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.send_marker(AttrType::DataEnd, NOTIFY_DATA_END, deadline)
    }

    /// Read the next processed record, up to and including its DataEnd.
    pub fn recv_record(&mut self) -> Result<ReceivedRecord> {
        let deadline = Instant::now() + self.timeout;
        let capacity = self.reader.capacity();
        let mut data = BytesMut::new();
        let mut events = Vec::new();

        loop {
            match self.reader.acquire(capacity) {
                Ok(grant) => {
                    self.reader
                        .with_grant(|bytes| data.extend_from_slice(bytes))?;
                    self.reader.release(grant.len)?;
                    match events.last_mut() {
                        Some(RecordEvent::Data(len)) => *len += grant.len,
                        _ => events.push(RecordEvent::Data(grant.len)),
                    }
                }
                Err(RingError::PendingAttribute) => {
                    match self.attrs.get_fixed(&mut self.reader) {
                        Ok(FixedAttribute { kind, .. }) => match kind {
                            AttrType::DataStart => events.push(RecordEvent::DataStart),
                            AttrType::DataEnd => {
                                events.push(RecordEvent::DataEnd);
                                break;
                            }
                            AttrType::RemoteShutdown => {}
                        },
                        Err(err) if err.is_variable_pending() => {
                            let attr = self.attrs.get_variable(&mut self.reader)?;
                            if attr.kind == VARIABLE_RECORD_SIZE {
                                events.push(RecordEvent::RecordSize(
                                    attr.first_word().unwrap_or_default(),
                                ));
                            }
                        }
                        Err(err) if err.is_transient() => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) if err.is_transient() => self.wait(Role::Reader, deadline)?,
                Err(err) => return Err(err.into()),
            }
        }

        let flags = self.reader_bridge.flags();
        flags.take_data_start();
        flags.take_data_end();
        Ok(ReceivedRecord {
            data: data.freeze(),
            events,
        })
    }

    /// Ask the pipeline to stop via the remote-shutdown notification.
    ///
    /// A pipeline that already detached counts as stopped.
    pub fn request_shutdown(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let Self {
            writer,
            writer_bridge,
            idle,
            timeout,
            ..
        } = self;
        retry_until(writer_bridge, idle, deadline, *timeout, || {
            if !writer.peer_attached() {
                return Ok(());
            }
            writer
                .send_notify(NOTIFY_REMOTE_SHUTDOWN)
                .map_err(PipelineError::from)
        })?;
        debug!(stream = %self.stream, "remote shutdown requested");
        Ok(())
    }

    /// Ask the pipeline to stop with an in-band RemoteShutdown attribute.
    pub fn send_shutdown_attribute(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let Self {
            writer,
            attrs,
            writer_bridge,
            idle,
            timeout,
            ..
        } = self;
        retry_until(writer_bridge, idle, deadline, *timeout, || {
            attrs
                .set_fixed(writer, AttrType::RemoteShutdown)
                .map_err(PipelineError::from)
        })?;
        // Wake a pipeline blocked on an empty ring.
        let _ = self.writer.send_notify(ringprims_attr::NOTIFY_NONE);
        Ok(())
    }

    /// Close both endpoints and delete the inbound ring.
    pub fn close(self) -> Result<()> {
        let HostPeer {
            registry,
            inbound_name,
            writer,
            reader,
            timeout,
            stream,
            ..
        } = self;
        reader.close()?;
        writer.close_after_drain(timeout)?;
        registry.delete(&inbound_name)?;
        debug!(stream = %stream, "host closed");
        Ok(())
    }

    fn send_marker(&mut self, kind: AttrType, msg: u16, deadline: Instant) -> Result<()> {
        let Self {
            writer,
            attrs,
            writer_bridge,
            idle,
            timeout,
            ..
        } = self;
        retry_until(writer_bridge, idle, deadline, *timeout, || {
            attrs.set_fixed(writer, kind).map_err(PipelineError::from)
        })?;
        retry_until(writer_bridge, idle, deadline, *timeout, || {
            writer.send_notify(msg).map_err(PipelineError::from)
        })
    }

    fn wait(&self, side: Role, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            return Err(PipelineError::Timeout(self.timeout));
        }
        match side {
            Role::Writer => self.writer_bridge.wait(&self.idle),
            Role::Reader => self.reader_bridge.wait(&self.idle),
        };
        Ok(())
    }
}

impl std::fmt::Debug for HostPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPeer")
            .field("stream", &self.stream)
            .field("writer", &self.writer)
            .field("reader", &self.reader)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn retry_until<T>(
    bridge: &NotificationBridge,
    idle: &ShutdownSignal,
    deadline: Instant,
    timeout: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if Instant::now() >= deadline {
                    return Err(PipelineError::Timeout(timeout));
                }
                bridge.wait(idle);
            }
            Err(err) => return Err(err),
        }
    }
}
