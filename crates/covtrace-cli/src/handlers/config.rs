//! Config command handler

use crate::{CliResult, ConfigArgs};
use covtrace::{ConfigResolver, EnvironmentReader, OptionsSnapshot, ProcessEnvironment};
use std::io::Write;
use std::path::Path;

/// Resolve options for `process`
///
/// An explicit config file must exist; the default one next to the recorder
/// library may be absent.
pub fn resolve_options<E>(process: &str, config: Option<&Path>, env: &E) -> OptionsSnapshot
where
    E: EnvironmentReader + ?Sized,
{
    match config {
        Some(path) => ConfigResolver::resolve_file(path, process, env, true),
        None => {
            let path = ConfigResolver::default_config_path(env);
            ConfigResolver::resolve_file(&path, process, env, false)
        }
    }
}

/// Render options as pretty JSON
pub fn render_options(options: &OptionsSnapshot) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(options)?)
}

/// Execute the config command
pub fn execute_config(args: &ConfigArgs) -> CliResult<()> {
    let options = resolve_options(&args.process, args.config.as_deref(), &ProcessEnvironment);
    for problem in &options.problems {
        tracing::warn!(problem = %problem, "configuration problem");
    }
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", render_options(&options)?)?;
    Ok(())
}
