//! Option resolution
//!
//! Merges matching configuration sections with environment overrides into an
//! immutable, strongly typed [`OptionsSnapshot`]. Nothing here fails: every
//! problem is recorded in the snapshot and resolution falls back to the
//! environment and built-in defaults.
//!
//! Precedence per option:
//!
//! 1. environment value for the upper-case option name
//! 2. value from the last matching section in file order
//! 3. built-in default
//!
//! The legacy `PROCESS` suffix rule runs after everything else and can only
//! disable profiling.

use super::env::EnvironmentReader;
use super::parser::{ConfigFile, ProcessSection};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default request endpoint of the test orchestrator
pub const DEFAULT_TIA_REQUEST_SOCKET: &str = "tcp://127.0.0.1:7146";

/// File name of the configuration next to the recorder library
pub const DEFAULT_CONFIG_FILE_NAME: &str = "Profiler.yml";

/// Placeholder for snapshots not resolved from a file
const CONFIG_PATH_NOT_SPECIFIED: &str = "<not specified>";

/// Option names
mod keys {
    pub const TARGET_DIR: &str = "targetdir";
    pub const ENABLED: &str = "enabled";
    pub const LIGHT_MODE: &str = "light_mode";
    pub const ASSEMBLY_FILE_VERSION: &str = "assembly_file_version";
    pub const ASSEMBLY_PATHS: &str = "assembly_paths";
    pub const DUMP_ENVIRONMENT: &str = "dump_environment";
    pub const EAGERNESS: &str = "eagerness";
    pub const TIA: &str = "tia";
    pub const TIA_REQUEST_SOCKET: &str = "tia_request_socket";
    /// Legacy process-name suffix, environment only
    pub const PROCESS: &str = "process";
    /// Path of the recorder library, environment only
    pub const PATH: &str = "path";
}

/// Resolved recorder options for one profiled process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionsSnapshot {
    /// Whether to record anything at all
    pub enabled: bool,
    /// Directory for trace files
    pub target_dir: Option<PathBuf>,
    /// Light mode: entered methods are not tracked unless test-wise
    /// segmentation needs them
    pub light_mode: bool,
    /// Include assembly file versions in assembly records
    pub assembly_file_version: bool,
    /// Include assembly load paths in assembly records
    pub assembly_paths: bool,
    /// Write the process environment into the trace
    pub dump_environment: bool,
    /// Pending method records that trigger an eager flush, 0 disables
    pub eagerness: usize,
    /// Test-wise segmentation
    pub tia: bool,
    /// Request endpoint of the test orchestrator
    pub tia_request_socket: String,
    /// Non-fatal problems encountered while resolving
    pub problems: Vec<String>,
    /// Configuration file the snapshot was resolved from
    pub config_path: String,
    /// Process the snapshot was resolved for
    pub process_path: String,
}

impl Default for OptionsSnapshot {
    fn default() -> Self {
        Self {
            enabled: true,
            target_dir: None,
            light_mode: true,
            assembly_file_version: false,
            assembly_paths: false,
            dump_environment: false,
            eagerness: 0,
            tia: false,
            tia_request_socket: DEFAULT_TIA_REQUEST_SOCKET.to_string(),
            problems: Vec::new(),
            config_path: CONFIG_PATH_NOT_SPECIFIED.to_string(),
            process_path: String::new(),
        }
    }
}

impl OptionsSnapshot {
    /// Whether the recorder should run for this process
    #[must_use]
    pub const fn is_profiling_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether method entries are routed to the collector
    #[must_use]
    pub const fn is_entry_tracking_enabled(&self) -> bool {
        self.tia || !self.light_mode
    }

    /// Whether test-wise segmentation is on
    #[must_use]
    pub const fn is_tia_enabled(&self) -> bool {
        self.tia
    }

    /// Eager flush threshold, `None` when disabled
    #[must_use]
    pub const fn eager_flush_threshold(&self) -> Option<usize> {
        if self.eagerness == 0 {
            None
        } else {
            Some(self.eagerness)
        }
    }

    /// Whether resolution recorded any problem
    #[must_use]
    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }

    /// Textual value of a recognized option, `None` for unknown or unset
    /// options
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let value = match name.to_lowercase().as_str() {
            keys::TARGET_DIR => return self.target_dir.as_ref().map(|p| p.display().to_string()),
            keys::ENABLED => self.enabled.to_string(),
            keys::LIGHT_MODE => self.light_mode.to_string(),
            keys::ASSEMBLY_FILE_VERSION => self.assembly_file_version.to_string(),
            keys::ASSEMBLY_PATHS => self.assembly_paths.to_string(),
            keys::DUMP_ENVIRONMENT => self.dump_environment.to_string(),
            keys::EAGERNESS => self.eagerness.to_string(),
            keys::TIA => self.tia.to_string(),
            keys::TIA_REQUEST_SOCKET => self.tia_request_socket.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Option lookup over the matched sections and the environment
struct OptionSource<'a, E: ?Sized> {
    /// Matched sections, most recently matched first
    sections: Vec<&'a ProcessSection>,
    env: &'a E,
}

impl<E: EnvironmentReader + ?Sized> OptionSource<'_, E> {
    fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.env.read(&name.to_ascii_uppercase()) {
            return Some(value);
        }
        self.sections
            .iter()
            .find_map(|section| section.option(name))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn boolean(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .map_or(default, |value| value == "true" || value == "1")
    }
}

/// Builds [`OptionsSnapshot`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigResolver;

impl ConfigResolver {
    /// Resolve options from configuration text
    pub fn resolve<E>(config_text: &str, process_path: &str, env: &E) -> OptionsSnapshot
    where
        E: EnvironmentReader + ?Sized,
    {
        let mut problems = Vec::new();
        let file = match ConfigFile::parse(config_text) {
            Ok(file) => file,
            Err(e) => {
                problems.push(e.to_string());
                ConfigFile::default()
            }
        };
        Self::build(&file, process_path, env, problems, CONFIG_PATH_NOT_SPECIFIED.to_string())
    }

    /// Resolve options from a configuration file
    ///
    /// A missing file is a problem only when `report_missing` is set; an
    /// unreadable file always is.
    pub fn resolve_file<E>(
        path: &Path,
        process_path: &str,
        env: &E,
        report_missing: bool,
    ) -> OptionsSnapshot
    where
        E: EnvironmentReader + ?Sized,
    {
        let mut problems = Vec::new();
        let file = match fs::read_to_string(path) {
            Ok(text) => match ConfigFile::parse(&text) {
                Ok(file) => file,
                Err(e) => {
                    problems.push(e.to_string());
                    ConfigFile::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if report_missing {
                    problems.push(format!("The config file {} does not exist", path.display()));
                }
                ConfigFile::default()
            }
            Err(e) => {
                problems.push(format!(
                    "Failed to open the config file {} for reading: {e}",
                    path.display()
                ));
                ConfigFile::default()
            }
        };
        Self::build(&file, process_path, env, problems, path.display().to_string())
    }

    /// `Profiler.yml` next to the recorder library named by the `PATH` option
    #[must_use]
    pub fn default_config_path<E>(env: &E) -> PathBuf
    where
        E: EnvironmentReader + ?Sized,
    {
        let library = env.read(&keys::PATH.to_ascii_uppercase()).unwrap_or_default();
        let directory = library
            .rfind(|c| c == '/' || c == '\\')
            .map_or("", |index| &library[..index]);
        if directory.is_empty() {
            PathBuf::from(DEFAULT_CONFIG_FILE_NAME)
        } else {
            Path::new(directory).join(DEFAULT_CONFIG_FILE_NAME)
        }
    }

    fn build<E>(
        file: &ConfigFile,
        process_path: &str,
        env: &E,
        mut problems: Vec<String>,
        config_path: String,
    ) -> OptionsSnapshot
    where
        E: EnvironmentReader + ?Sized,
    {
        let mut sections: Vec<&ProcessSection> = file.matching(process_path).collect();
        sections.reverse();
        debug!(process = process_path, matched = sections.len(), "resolving options");

        let source = OptionSource { sections, env };
        let defaults = OptionsSnapshot::default();

        let eagerness = match source.get(keys::EAGERNESS) {
            None => 0,
            Some(value) => value.trim().parse::<usize>().unwrap_or_else(|_| {
                problems.push(format!(
                    "Invalid eagerness value configured: {value}. Using the default of no eagerness instead"
                ));
                0
            }),
        };

        let mut snapshot = OptionsSnapshot {
            enabled: source.boolean(keys::ENABLED, defaults.enabled),
            target_dir: source.get(keys::TARGET_DIR).map(PathBuf::from),
            light_mode: source.boolean(keys::LIGHT_MODE, defaults.light_mode),
            assembly_file_version: source
                .boolean(keys::ASSEMBLY_FILE_VERSION, defaults.assembly_file_version),
            assembly_paths: source.boolean(keys::ASSEMBLY_PATHS, defaults.assembly_paths),
            dump_environment: source.boolean(keys::DUMP_ENVIRONMENT, defaults.dump_environment),
            eagerness,
            tia: source.boolean(keys::TIA, defaults.tia),
            tia_request_socket: source
                .get(keys::TIA_REQUEST_SOCKET)
                .unwrap_or(defaults.tia_request_socket),
            problems,
            config_path,
            process_path: process_path.to_string(),
        };

        // Must stay last: it may only switch profiling off.
        if let Some(suffix) = env.read(&keys::PROCESS.to_ascii_uppercase()) {
            if !ends_with_ignore_case(process_path, &suffix) {
                debug!(suffix = %suffix, "process suffix does not match, profiling disabled");
                snapshot.enabled = false;
            }
        }
        snapshot
    }
}

fn ends_with_ignore_case(text: &str, suffix: &str) -> bool {
    text.to_lowercase().ends_with(&suffix.to_lowercase())
}
