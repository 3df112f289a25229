use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ringprims_pipeline::PipelineStats;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Host-side view of one stream during `run`.
#[derive(Debug, Default, Serialize)]
pub struct HostSummary {
    pub records: u64,
    pub bytes: u64,
    /// Records whose processed bytes differed from the expected transform.
    pub mismatched: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StreamOutput {
    pub name: String,
    pub status: &'static str,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PipelineStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostSummary>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub streams: Vec<StreamOutput>,
    pub overall: &'static str,
}

pub fn print_run(output: &RunOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "STREAM", "STATUS", "CYCLES", "RECEIVED", "SENT", "DROPPED", "CANCELLED",
                    "HOST", "ERROR",
                ]);
            for stream in &output.streams {
                let stats = stream.stats.clone().unwrap_or_default();
                table.add_row(vec![
                    stream.name.clone(),
                    stream.status.to_string(),
                    stats.cycles.to_string(),
                    stats.bytes_received.to_string(),
                    stats.bytes_sent.to_string(),
                    stats.bytes_dropped.to_string(),
                    stats.bytes_cancelled.to_string(),
                    host_cell(stream.host.as_ref()),
                    stream.error.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("ringprims run\n");
            for stream in &output.streams {
                match &stream.stats {
                    Some(stats) => println!(
                        "  [{:>5}] {:<16} cycles={} received={}B sent={}B dropped={}B cancelled={}B",
                        stream.status,
                        stream.name,
                        stats.cycles,
                        stats.bytes_received,
                        stats.bytes_sent,
                        stats.bytes_dropped,
                        stats.bytes_cancelled
                    ),
                    None => println!(
                        "  [{:>5}] {:<16} code={} {}",
                        stream.status,
                        stream.name,
                        stream.code,
                        stream.error.as_deref().unwrap_or("")
                    ),
                }
                if let Some(host) = &stream.host {
                    println!("          host: {}", host_cell(Some(host)));
                }
            }
            println!("\n  Result: {}", output.overall);
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn host_cell(host: Option<&HostSummary>) -> String {
    match host {
        None => "-".to_string(),
        Some(host) => match &host.error {
            Some(err) => format!("{} records, error: {err}", host.records),
            None if host.mismatched > 0 => {
                format!("{} records, {} mismatched", host.records, host.mismatched)
            }
            None => format!("{} records ok", host.records),
        },
    }
}
