use std::any::Any;
use std::thread::{self, JoinHandle};

use ringprims_ring::RingRegistry;
use tracing::{error, info};

use crate::config::PipelineSetConfig;
use crate::error::{PipelineError, Result};
use crate::notify::ShutdownSignal;
use crate::pipeline::{PipelineStats, StreamPipeline};

/// How one stream of a set ended.
#[derive(Debug)]
pub struct PipelineReport {
    pub name: String,
    pub outcome: Result<PipelineStats>,
}

impl PipelineReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// `0` for a clean stop, otherwise the pipeline's failure code.
    pub fn code(&self) -> u16 {
        match &self.outcome {
            Ok(_) => 0,
            Err(err) => err.code(),
        }
    }
}

struct Worker {
    name: String,
    handle: JoinHandle<Result<PipelineStats>>,
}

/// Independent stream pipelines, one thread each.
///
/// Pipelines share nothing but the shutdown signal; a failed stream does
/// not stop the others.
pub struct PipelineSet {
    workers: Vec<Worker>,
    shutdown: ShutdownSignal,
}

impl PipelineSet {
    pub fn spawn(config: &PipelineSetConfig, registry: &RingRegistry) -> Result<Self> {
        config.validate()?;
        let mut set = Self {
            workers: Vec::with_capacity(config.streams.len()),
            shutdown: ShutdownSignal::new(),
        };
        for stream in &config.streams {
            let pipeline = StreamPipeline::new(stream.clone(), registry.clone(), set.shutdown.clone());
            let spawned = thread::Builder::new()
                .name(format!("ringprims-{}", stream.name))
                .spawn(move || pipeline.run());
            match spawned {
                Ok(handle) => set.workers.push(Worker {
                    name: stream.name.clone(),
                    handle,
                }),
                Err(err) => {
                    set.shutdown();
                    let _ = set.join();
                    return Err(PipelineError::Io(err));
                }
            }
        }
        info!(streams = set.workers.len(), "pipeline set started");
        Ok(set)
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Request every pipeline to stop and wake any blocked wait.
    pub fn shutdown(&self) {
        info!("pipeline set shutdown requested");
        self.shutdown.trigger();
    }

    /// Whether every pipeline thread has returned.
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(|w| w.handle.is_finished())
    }

    /// Wait for every pipeline and report each outcome, in configuration order.
    pub fn join(self) -> Vec<PipelineReport> {
        self.workers
            .into_iter()
            .map(|worker| {
                let outcome = worker
                    .handle
                    .join()
                    .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic))));
                if let Err(err) = &outcome {
                    error!(stream = %worker.name, code = err.code(), error = %err, "pipeline stopped with error");
                }
                PipelineReport {
                    name: worker.name,
                    outcome,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for PipelineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSet")
            .field("streams", &self.names())
            .field("shutdown", &self.shutdown.is_set())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
