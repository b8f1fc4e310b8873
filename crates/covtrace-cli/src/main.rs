//! Covtrace CLI: inspect and exercise the coverage recorder
//!
//! ## Usage
//!
//! ```bash
//! covtrace config --process /usr/bin/app            # Resolved options as JSON
//! covtrace orchestrate --endpoint tcp://127.0.0.1:7146
//! covtrace replay events.txt --process /usr/bin/app # Write a trace file
//! ```

use clap::Parser;
use covtrace_cli::{
    handlers::{execute_config, execute_orchestrate, execute_replay},
    Cli, CliConfig, CliResult, Commands, Verbosity,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_logging(&config);

    let quiet = config.verbosity.is_quiet();
    match cli.command {
        Commands::Config(args) => execute_config(&args),
        Commands::Orchestrate(args) => execute_orchestrate(&args, quiet),
        Commands::Replay(args) => execute_replay(&args, quiet).map(|_| ()),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new().with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
}

/// Log to stderr; `RUST_LOG` overrides the verbosity flags
fn init_logging(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
