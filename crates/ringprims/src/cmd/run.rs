use std::thread::{self, JoinHandle};

use ringprims_pipeline::{
    HostPeer, PipelineReport, PipelineSet, Result as PipelineResult, ShutdownSignal, StreamConfig,
    Transform,
};
use ringprims_ring::RingRegistry;
use tracing::{info, warn};

use crate::cmd::{config, RunArgs};
use crate::exit::{io_error, pipeline_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_run, HostSummary, OutputFormat, RunOutput, StreamOutput};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = config::load(args.config.as_deref())?;
    let registry = RingRegistry::new();
    let set = PipelineSet::spawn(&config, &registry)
        .map_err(|err| pipeline_error("failed to start pipelines", err))?;
    let shutdown = set.shutdown_signal();
    if let Err(err) = install_ctrlc_handler(shutdown.clone()) {
        set.shutdown();
        let _ = set.join();
        return Err(err);
    }

    let mut hosts = Vec::new();
    if args.records > 0 {
        for stream in &config.streams {
            match spawn_host(stream.clone(), &registry, &shutdown, args.records) {
                Ok(handle) => hosts.push(handle),
                Err(err) => {
                    set.shutdown();
                    let _ = set.join();
                    return Err(err);
                }
            }
        }
    } else {
        info!("running until interrupted");
    }

    let summaries: Vec<HostSummary> = hosts
        .into_iter()
        .map(|handle| {
            handle.join().unwrap_or_else(|_| HostSummary {
                error: Some("host thread panicked".to_string()),
                ..HostSummary::default()
            })
        })
        .collect();
    let reports = set.join();

    let output = build_output(reports, summaries);
    print_run(&output, format);
    if output.overall == "pass" {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn spawn_host(
    stream: StreamConfig,
    registry: &RingRegistry,
    shutdown: &ShutdownSignal,
    records: u64,
) -> CliResult<JoinHandle<HostSummary>> {
    let registry = registry.clone();
    let shutdown = shutdown.clone();
    thread::Builder::new()
        .name(format!("host-{}", stream.name))
        .spawn(move || {
            let mut summary = HostSummary::default();
            if let Err(err) = drive_host(&stream, &registry, &shutdown, records, &mut summary) {
                warn!(stream = %stream.name, error = %err, "host stopped with error");
                summary.error = Some(err.to_string());
            }
            summary
        })
        .map_err(|err| io_error("failed to spawn host thread", err))
}

fn drive_host(
    stream: &StreamConfig,
    registry: &RingRegistry,
    shutdown: &ShutdownSignal,
    records: u64,
    summary: &mut HostSummary,
) -> PipelineResult<()> {
    let mut host = match HostPeer::attach(registry, stream) {
        Ok(host) => host,
        Err(err) => {
            // The pipeline would otherwise wait for this inbound ring forever.
            shutdown.trigger();
            return Err(err);
        }
    };

    let exchanged = exchange(&mut host, stream, shutdown, records, summary);
    let stopped = host.request_shutdown();
    let closed = host.close();
    exchanged.and(stopped).and(closed)
}

fn exchange(
    host: &mut HostPeer,
    stream: &StreamConfig,
    shutdown: &ShutdownSignal,
    records: u64,
    summary: &mut HostSummary,
) -> PipelineResult<()> {
    for index in 0..records {
        if shutdown.is_set() {
            break;
        }
        let record = record_pattern(index, stream.record_size);
        host.send_record(&record)?;
        let received = host.recv_record()?;

        summary.records += 1;
        summary.bytes += received.data.len() as u64;
        if received.data.as_ref() != expected_output(&record, stream).as_slice() {
            warn!(stream = %stream.name, record = index, "processed record differs from expected");
            summary.mismatched += 1;
        }
    }
    Ok(())
}

/// Deterministic record contents; each record starts from a different byte.
fn record_pattern(index: u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (index as usize).wrapping_add(i) as u8)
        .collect()
}

/// What the pipeline sends for `record`: the record repeated up to the send
/// size, transformed one chunk at a time.
fn expected_output(record: &[u8], stream: &StreamConfig) -> Vec<u8> {
    let transform = stream.transform.build();
    let chunk = stream.chunk();
    let mut out = Vec::with_capacity(stream.send_size);
    let mut sent = 0;
    while sent < stream.send_size {
        let mut buf: Vec<u8> = (0..chunk)
            .map(|i| {
                if record.is_empty() {
                    0
                } else {
                    record[(sent + i) % record.len()]
                }
            })
            .collect();
        transform.apply(&mut buf);
        let keep = chunk.min(stream.send_size - sent);
        out.extend_from_slice(&buf[..keep]);
        sent += keep;
    }
    out
}

fn build_output(reports: Vec<PipelineReport>, summaries: Vec<HostSummary>) -> RunOutput {
    let mut summaries = summaries.into_iter();
    let mut failed = false;
    let streams = reports
        .into_iter()
        .map(|report| {
            let host = summaries.next();
            let code = report.code();
            let host_failed = host
                .as_ref()
                .is_some_and(|h| h.error.is_some() || h.mismatched > 0);
            failed |= code != 0 || host_failed;
            let (stats, error) = match report.outcome {
                Ok(stats) => (Some(stats), None),
                Err(err) => (None, Some(err.to_string())),
            };
            StreamOutput {
                name: report.name,
                status: if code == 0 { "ok" } else { "error" },
                code,
                error,
                stats,
                host,
            }
        })
        .collect();
    RunOutput {
        streams,
        overall: if failed { "fail" } else { "pass" },
    }
}

fn install_ctrlc_handler(shutdown: ShutdownSignal) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.trigger();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
