use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::channel::RingChannel;
use crate::error::{Result, RingError};
use crate::flags::{OpenFlags, Role};
use crate::segment::Segment;

/// Sizing of a segment at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingAttrs {
    /// Data region size in bytes.
    pub data_buf_size: usize,
    /// Extra bytes past the data region used by exact-size writer grants
    /// that cross the physical end.
    pub foot_buf_size: usize,
    /// Attribute region size in bytes.
    pub attr_buf_size: usize,
}

impl Default for RingAttrs {
    fn default() -> Self {
        Self {
            data_buf_size: 4096,
            foot_buf_size: 0,
            attr_buf_size: 256,
        }
    }
}

/// Name registry for ring segments shared between the two domains.
///
/// Cloning is cheap; clones see the same names.
#[derive(Clone, Default)]
pub struct RingRegistry {
    segments: Arc<Mutex<HashMap<String, Arc<Segment>>>>,
}

impl RingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn segments(&self) -> MutexGuard<'_, HashMap<String, Arc<Segment>>> {
        self.segments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a segment under `name`.
    pub fn create(&self, name: &str, attrs: RingAttrs) -> Result<()> {
        if attrs.data_buf_size == 0 {
            return Err(RingError::InvalidSize {
                requested: 0,
                capacity: 0,
            });
        }
        let mut segments = self.segments();
        if segments.contains_key(name) {
            return Err(RingError::AlreadyExists {
                name: name.to_string(),
            });
        }
        segments.insert(
            name.to_string(),
            Arc::new(Segment::new(name.to_string(), &attrs)),
        );
        info!(
            ring = name,
            data = attrs.data_buf_size,
            foot = attrs.foot_buf_size,
            attr = attrs.attr_buf_size,
            "ring created"
        );
        Ok(())
    }

    /// Attach an endpoint to an existing segment.
    ///
    /// `NotFound` is transient: the peer domain may not have created the
    /// name yet.
    pub fn open(&self, name: &str, role: Role, flags: OpenFlags) -> Result<RingChannel> {
        let segment = self
            .segments()
            .get(name)
            .cloned()
            .ok_or_else(|| RingError::NotFound {
                name: name.to_string(),
            })?;
        RingChannel::attach(segment, role, flags)
    }

    /// Open `name`, retrying transient failures every `interval` until it
    /// succeeds or `stop` returns true.
    ///
    /// Returns `Ok(None)` when stopped before the name appeared.
    pub fn open_with_retry(
        &self,
        name: &str,
        role: Role,
        flags: OpenFlags,
        interval: Duration,
        stop: impl Fn() -> bool,
    ) -> Result<Option<RingChannel>> {
        let mut attempts = 0u64;
        loop {
            if stop() {
                debug!(ring = name, %role, attempts, "open abandoned");
                return Ok(None);
            }
            match self.open(name, role, flags) {
                Ok(channel) => return Ok(Some(channel)),
                Err(err) if err.is_transient() => {
                    if attempts == 0 {
                        debug!(ring = name, %role, "waiting for ring to be created");
                    }
                    attempts += 1;
                    thread::sleep(interval);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Remove `name` from the registry.
    ///
    /// Endpoints that are still open keep the segment memory alive until
    /// they are closed.
    pub fn delete(&self, name: &str) -> Result<()> {
        if self.segments().remove(name).is_none() {
            return Err(RingError::NotFound {
                name: name.to_string(),
            });
        }
        debug!(ring = name, "ring deleted");
        Ok(())
    }

    /// Whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.segments().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.segments().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for RingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingRegistry")
            .field("names", &self.names())
            .finish()
    }
}
