//! Covtrace CLI Library
//!
//! Command-line front end for the covtrace recorder: resolve options for a
//! process, drive a test session by hand, and replay event scripts into
//! trace files.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod config;
mod error;
pub mod handlers;

pub use commands::{Cli, Commands, ConfigArgs, OrchestrateArgs, ReplayArgs};
pub use config::{CliConfig, Verbosity};
pub use error::{CliError, CliResult};
