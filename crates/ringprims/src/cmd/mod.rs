use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod config;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the configured pipelines against in-process hosts.
    Run(RunArgs),
    /// Print the effective pipeline configuration as JSON.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Config(args) => config::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline set configuration (JSON). Default: two built-in streams.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Records each host sends before requesting shutdown. 0 runs until Ctrl-C.
    #[arg(long, default_value = "1")]
    pub records: u64,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file to validate and print.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
