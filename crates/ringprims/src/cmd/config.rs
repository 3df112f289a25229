use std::path::Path;

use ringprims_pipeline::PipelineSetConfig;

use crate::cmd::ConfigArgs;
use crate::exit::{pipeline_error, CliResult, SUCCESS};
use crate::output::print_json;

pub fn run(args: ConfigArgs) -> CliResult<i32> {
    let config = load(args.config.as_deref())?;
    print_json(&config);
    Ok(SUCCESS)
}

/// The file's configuration, or the built-in default when no file is given.
pub fn load(path: Option<&Path>) -> CliResult<PipelineSetConfig> {
    match path {
        Some(path) => PipelineSetConfig::from_json_file(path).map_err(|err| {
            let context = format!("failed to load {}", path.display());
            pipeline_error(&context, err)
        }),
        None => {
            let config = PipelineSetConfig::default();
            config
                .validate()
                .map_err(|err| pipeline_error("default configuration", err))?;
            Ok(config)
        }
    }
}
