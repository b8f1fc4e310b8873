//! Recorder Configuration
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ Profiler.yml │──►│ ConfigFile   │──►│                 │
//! └──────────────┘   │ (sections)   │   │ ConfigResolver  │──► OptionsSnapshot
//! ┌──────────────┐   └──────────────┘   │                 │
//! │ Environment  │─────────────────────►│                 │
//! └──────────────┘                      └─────────────────┘
//! ```

mod env;
mod options;
mod parser;

pub use env::{EnvironmentReader, NoEnvironment, ProcessEnvironment, ENV_PREFIX};
pub use options::{
    ConfigResolver, OptionsSnapshot, DEFAULT_CONFIG_FILE_NAME, DEFAULT_TIA_REQUEST_SOCKET,
};
pub use parser::{executable_name, ConfigFile, ProcessSection};
