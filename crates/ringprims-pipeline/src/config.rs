use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use ringprims_ring::RingAttrs;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::transform::{OpKind, ScaleTransform, UnitSize};

/// Scale transform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub op: OpKind,
    pub factor: u32,
    pub unit: UnitSize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            op: OpKind::Multiply,
            factor: 2,
            unit: UnitSize::Byte,
        }
    }
}

impl TransformConfig {
    pub fn build(&self) -> ScaleTransform {
        ScaleTransform {
            factor: self.factor,
            op: self.op,
            unit: self.unit,
        }
    }
}

/// One stream: the ring pair it uses and how records are sized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Stream name, used for the thread name and in logs.
    pub name: String,
    /// Ring created by the remote side; this pipeline reads it.
    pub inbound: String,
    /// Ring created by this pipeline; the remote side reads it.
    pub outbound: String,
    /// Data buffer size of each ring.
    pub ring_size: usize,
    /// Foot buffer size of the outbound ring.
    pub foot_size: usize,
    /// Attribute buffer size of each ring.
    pub attr_size: usize,
    /// Scratch buffer size and default inbound record size.
    pub record_size: usize,
    /// Bytes sent per outbound record.
    pub send_size: usize,
    /// Outbound acquire size; 0 means `send_size`.
    pub chunk_size: usize,
    /// Variable attribute word buffer size.
    pub max_attr_words: usize,
    pub transform: TransformConfig,
    /// Longest blocking wait before state is re-checked.
    pub poll_interval_ms: u64,
    /// Bound on waiting for the peer to consume attributes at close.
    pub drain_timeout_ms: u64,
    /// Delay between attempts to open a ring that does not exist yet.
    pub open_retry_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::named("stream1", 1024)
    }
}

impl StreamConfig {
    /// A stream named `name` whose rings, records and sends are all `size` bytes.
    pub fn named(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            inbound: format!("{name}.in"),
            outbound: format!("{name}.out"),
            ring_size: size,
            foot_size: 0,
            attr_size: 256,
            record_size: size,
            send_size: size,
            chunk_size: 0,
            max_attr_words: ringprims_attr::DEFAULT_MAX_WORDS,
            transform: TransformConfig::default(),
            poll_interval_ms: 100,
            drain_timeout_ms: 500,
            open_retry_ms: 5,
        }
    }

    pub fn chunk(&self) -> usize {
        if self.chunk_size == 0 {
            self.send_size
        } else {
            self.chunk_size
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn open_retry(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }

    /// Attributes of the outbound ring.
    pub fn outbound_attrs(&self) -> RingAttrs {
        RingAttrs {
            data_buf_size: self.ring_size,
            foot_buf_size: self.foot_size,
            attr_buf_size: self.attr_size,
        }
    }

    /// Attributes of the inbound ring, as the remote side creates it.
    pub fn inbound_attrs(&self) -> RingAttrs {
        RingAttrs {
            data_buf_size: self.ring_size,
            foot_buf_size: 0,
            attr_buf_size: self.attr_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(PipelineError::Config(format!("stream {:?}: {msg}", self.name)))
        };
        if self.name.is_empty() {
            return Err(PipelineError::Config("stream name must not be empty".into()));
        }
        if self.inbound.is_empty() || self.outbound.is_empty() {
            return fail("ring names must not be empty".into());
        }
        if self.inbound == self.outbound {
            return fail("inbound and outbound rings must differ".into());
        }
        if self.ring_size == 0 || self.record_size == 0 || self.send_size == 0 {
            return fail("ring_size, record_size and send_size must be non-zero".into());
        }
        if u32::try_from(self.send_size).is_err() {
            return fail(format!("send_size {} does not fit a size word", self.send_size));
        }
        let chunk = self.chunk();
        if chunk > self.ring_size {
            return fail(format!(
                "chunk size {chunk} exceeds ring size {}",
                self.ring_size
            ));
        }
        // Grants start on chunk boundaries, so a whole number of units per
        // chunk keeps word pairs from straddling two grants.
        let unit = self.transform.unit.bytes();
        if chunk % unit != 0 {
            return fail(format!(
                "chunk size {chunk} is not a whole number of {unit}-byte units"
            ));
        }
        // Exact-size grants stay aligned only if every release is a whole chunk
        // and chunks tile the ring; otherwise they may spill into the foot buffer.
        let aligned = self.ring_size % chunk == 0 && self.send_size % chunk == 0;
        if !aligned && self.foot_size + 1 < chunk {
            return fail(format!(
                "foot_size must be at least {} when chunks do not tile the ring",
                chunk - 1
            ));
        }
        if self.max_attr_words == 0 {
            return fail("max_attr_words must be at least 1".into());
        }
        if self.transform.op == OpKind::Divide && self.transform.factor == 0 {
            return fail("divide factor must be non-zero".into());
        }
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be non-zero".into());
        }
        Ok(())
    }
}

/// Streams run together by a [`PipelineSet`](crate::PipelineSet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSetConfig {
    pub streams: Vec<StreamConfig>,
}

impl Default for PipelineSetConfig {
    /// Two streams with 1024 and 2048 byte records.
    fn default() -> Self {
        Self {
            streams: vec![
                StreamConfig::named("stream1", 1024),
                StreamConfig::named("stream2", 2048),
            ],
        }
    }
}

impl PipelineSetConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(PipelineError::Config("no streams configured".into()));
        }
        let mut names = HashSet::new();
        let mut rings = HashSet::new();
        for stream in &self.streams {
            stream.validate()?;
            if !names.insert(stream.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate stream name {:?}",
                    stream.name
                )));
            }
            for ring in [&stream.inbound, &stream.outbound] {
                if !rings.insert(ring.as_str()) {
                    return Err(PipelineError::Config(format!(
                        "ring {ring:?} used by more than one stream"
                    )));
                }
            }
        }
        Ok(())
    }
}
