mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ringprims", version, about = "Ring channel pipeline CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "ringprims",
            "run",
            "--config",
            "/tmp/streams.json",
            "--records",
            "3",
        ])
        .expect("run args should parse");

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.records, 3);
                assert!(args.config.is_some());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_defaults_to_one_record() {
        let cli = Cli::try_parse_from(["ringprims", "run"]).expect("run should parse");
        assert!(matches!(cli.command, Command::Run(ref args) if args.records == 1));
    }

    #[test]
    fn rejects_unknown_output_format() {
        let err = Cli::try_parse_from(["ringprims", "--format", "raw", "config"])
            .expect_err("raw output is not offered");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
