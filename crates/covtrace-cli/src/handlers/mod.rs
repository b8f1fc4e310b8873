//! Command handlers - kept out of main.rs for testability
//!
//! Each handler module contains:
//! - The execution logic for a CLI command
//! - Pure helper functions
//! - Tests

pub mod config;
pub mod orchestrate;
pub mod replay;

pub use config::{execute_config, render_options, resolve_options};
pub use orchestrate::{execute_orchestrate, run_session, SessionCommand};
pub use replay::{execute_replay, parse_script, replay_events, ScriptEvent};
