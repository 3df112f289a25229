use std::fmt;
use std::io;

use ringprims_attr::AttrError;
use ringprims_pipeline::PipelineError;
use ringprims_ring::RingError;

// Process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn ring_error(context: &str, err: RingError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn attr_error(context: &str, err: AttrError) -> CliError {
    match err {
        AttrError::Ring(err) => ring_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn pipeline_error(context: &str, err: PipelineError) -> CliError {
    match err {
        PipelineError::Ring(err) => ring_error(context, err),
        PipelineError::Attr(err) => attr_error(context, err),
        PipelineError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PipelineError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PipelineError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PipelineError::Io(source) => io_error(context, source),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_pipeline_errors_to_exit_codes() {
        let err = pipeline_error("run", PipelineError::Config("bad".into()));
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("run: "));

        let err = pipeline_error("run", PipelineError::Ring(RingError::Closed));
        assert_eq!(err.code, TRANSPORT_ERROR);

        let err = pipeline_error(
            "run",
            PipelineError::Attr(AttrError::Oversized {
                size: 8,
                capacity: 4,
            }),
        );
        assert_eq!(err.code, DATA_INVALID);

        let err = pipeline_error("run", PipelineError::Timeout(std::time::Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn missing_config_file_is_a_usage_error() {
        let err = io_error("config", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.code, USAGE);
    }
}
