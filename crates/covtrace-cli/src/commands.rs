//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Covtrace: inspect recorder configuration, drive test sessions and replay
/// coverage event scripts
#[derive(Parser, Debug)]
#[command(name = "covtrace")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve recorder options for a process and print them as JSON
    Config(ConfigArgs),

    /// Run a test orchestrator driven by commands on stdin
    ///
    /// Commands: `start <name>`, `stop [duration]`, `status`, `exit`.
    Orchestrate(OrchestrateArgs),

    /// Feed an event script into a recorder writing a trace file
    ///
    /// Script lines: `assembly <ordinal> <name> [a.b.c.d]`,
    /// `jit <assembly> <method>`, `inline <assembly> <method>`,
    /// `enter <method>`, `test-start <name>`, `test-end <name> [duration]`,
    /// `flush`. Blank lines and `#` comments are ignored.
    Replay(ReplayArgs),
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Path of the profiled executable
    #[arg(long)]
    pub process: String,

    /// Configuration file (defaults to Profiler.yml next to the recorder library)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the orchestrate command
#[derive(Parser, Debug)]
pub struct OrchestrateArgs {
    /// Request endpoint to listen on
    #[arg(long, default_value = covtrace::config::DEFAULT_TIA_REQUEST_SOCKET)]
    pub endpoint: String,

    /// Milliseconds to wait for each recorder to acknowledge a test boundary
    #[arg(long, default_value = "2000")]
    pub ack_timeout: u64,
}

/// Arguments for the replay command
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Event script to replay
    pub script: PathBuf,

    /// Path of the profiled executable the events belong to
    #[arg(long)]
    pub process: String,

    /// Configuration file (defaults to Profiler.yml next to the recorder library)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the trace to this file instead of the configured target directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_config_command() {
        let cli = Cli::parse_from(["covtrace", "config", "--process", "/bin/app", "-c", "p.yml"]);
        match cli.command {
            Commands::Config(args) => {
                assert_eq!(args.process, "/bin/app");
                assert_eq!(args.config, Some(PathBuf::from("p.yml")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_orchestrate_defaults_to_standard_endpoint() {
        let cli = Cli::parse_from(["covtrace", "orchestrate"]);
        match cli.command {
            Commands::Orchestrate(args) => {
                assert_eq!(args.endpoint, "tcp://127.0.0.1:7146");
                assert_eq!(args.ack_timeout, 2000);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["covtrace", "replay", "events.txt", "--process", "a", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_replay_requires_process() {
        assert!(Cli::try_parse_from(["covtrace", "replay", "events.txt"]).is_err());
    }
}
