//! Replay command handler
//!
//! Replays a line-based event script through a [`CoverageRecorder`], the way
//! a host adapter would report them, and writes a real trace file.

use super::config::resolve_options;
use crate::{CliError, CliResult, ReplayArgs};
use covtrace::{
    AssemblyInfo, AssemblyOrdinal, CoverageRecorder, MethodId, ProcessEnvironment, SessionInfo,
    TraceLog, TraceSink,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One event of a replay script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// `assembly <ordinal> <name> [a.b.c.d]`
    Assembly(AssemblyInfo),
    /// `jit <assembly> <method>`
    Jitted {
        /// Declaring assembly
        assembly: AssemblyOrdinal,
        /// Compiled method
        method: MethodId,
    },
    /// `inline <assembly> <method>`
    Inlined {
        /// Declaring assembly
        assembly: AssemblyOrdinal,
        /// Inlined method
        method: MethodId,
    },
    /// `enter <method>`
    Entered(MethodId),
    /// `test-start <name>`
    TestStart(String),
    /// `test-end <name> [duration]`
    TestEnd {
        /// Test name
        name: String,
        /// Duration text, empty when omitted
        duration: String,
    },
    /// `flush`
    Flush,
}

/// Decimal or `0x` hexadecimal number
fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_version(text: &str) -> Option<[u16; 4]> {
    let mut version = [0u16; 4];
    let mut parts = text.split('.');
    for slot in &mut version {
        *slot = parts.next()?.parse().ok()?;
    }
    parts.next().is_none().then_some(version)
}

impl ScriptEvent {
    /// Parse line `number` of a script, `Ok(None)` for blanks and comments
    pub fn parse(number: usize, line: &str) -> CliResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        let number_at = |index: usize, what: &str| -> CliResult<u64> {
            args.get(index)
                .and_then(|text| parse_number(text))
                .ok_or_else(|| CliError::script(number, format!("'{word}' needs a numeric {what}")))
        };
        let method_at = |index: usize| -> CliResult<MethodId> {
            let method = MethodId::new(number_at(index, "method id")?);
            if method.is_reserved() {
                return Err(CliError::script(number, "method id 0 is reserved"));
            }
            Ok(method)
        };
        let ordinal_at = |index: usize| -> CliResult<AssemblyOrdinal> {
            let value = number_at(index, "assembly ordinal")?;
            u32::try_from(value)
                .map(AssemblyOrdinal::new)
                .map_err(|_| CliError::script(number, format!("assembly ordinal {value} is too large")))
        };

        let event = match word {
            "assembly" => {
                let ordinal = ordinal_at(0)?;
                let name = args
                    .get(1)
                    .ok_or_else(|| CliError::script(number, "'assembly' needs a name"))?;
                let version = match args.get(2) {
                    Some(text) => parse_version(text).ok_or_else(|| {
                        CliError::script(number, format!("invalid version '{text}'"))
                    })?,
                    None => [0; 4],
                };
                Self::Assembly(AssemblyInfo::new(ordinal, *name, version))
            }
            "jit" => Self::Jitted {
                assembly: ordinal_at(0)?,
                method: method_at(1)?,
            },
            "inline" => Self::Inlined {
                assembly: ordinal_at(0)?,
                method: method_at(1)?,
            },
            "enter" => Self::Entered(method_at(0)?),
            "test-start" if rest.is_empty() => {
                return Err(CliError::script(number, "'test-start' needs a test name"))
            }
            "test-start" => Self::TestStart(rest.to_string()),
            "test-end" => {
                let (name, duration) = match rest.rsplit_once(char::is_whitespace) {
                    Some((name, tail)) if tail.bytes().all(|b| b.is_ascii_digit()) => {
                        (name.trim_end(), tail)
                    }
                    _ => (rest, ""),
                };
                Self::TestEnd {
                    name: name.to_string(),
                    duration: duration.to_string(),
                }
            }
            "flush" => Self::Flush,
            other => return Err(CliError::script(number, format!("unknown event '{other}'"))),
        };
        Ok(Some(event))
    }
}

/// Parse a whole script, failing on the first malformed line
pub fn parse_script(text: &str) -> CliResult<Vec<(usize, ScriptEvent)>> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if let Some(event) = ScriptEvent::parse(index + 1, line)? {
            events.push((index + 1, event));
        }
    }
    Ok(events)
}

/// Deliver `events` to `recorder` in order
///
/// Recorder rejections are reported with the script line they came from.
pub fn replay_events<S: TraceSink + 'static>(
    recorder: &CoverageRecorder<S>,
    events: &[(usize, ScriptEvent)],
) -> CliResult<()> {
    for (line, event) in events {
        debug!(line, event = ?event, "replaying");
        let result = match event {
            ScriptEvent::Assembly(info) => {
                recorder.on_assembly_loaded(info.clone());
                Ok(())
            }
            ScriptEvent::Jitted { assembly, method } => recorder.on_jitted(*method, *assembly),
            ScriptEvent::Inlined { assembly, method } => recorder.on_inlined(*method, *assembly),
            ScriptEvent::Entered(method) => {
                recorder.on_method_entered(*method);
                Ok(())
            }
            ScriptEvent::TestStart(name) => recorder.on_test_start(name),
            ScriptEvent::TestEnd { name, duration } => recorder.on_test_end(name, duration),
            ScriptEvent::Flush => recorder.flush(),
        };
        result.map_err(|e| CliError::script(*line, e.to_string()))?;
    }
    Ok(())
}

/// Trace file destination: explicit output, configured target directory, or
/// the current directory
fn open_trace_log(output: Option<&Path>, target_dir: Option<&Path>) -> CliResult<TraceLog> {
    let log = match output {
        Some(path) => TraceLog::create_at(path)?,
        None => TraceLog::create(target_dir.unwrap_or_else(|| Path::new(".")))?,
    };
    Ok(log)
}

/// Execute the replay command, returning the trace file written
pub fn execute_replay(args: &ReplayArgs, quiet: bool) -> CliResult<Option<PathBuf>> {
    let script = std::fs::read_to_string(&args.script).map_err(|e| {
        CliError::config(format!("cannot read script {}: {e}", args.script.display()))
    })?;
    let events = parse_script(&script)?;

    let options = resolve_options(&args.process, args.config.as_deref(), &ProcessEnvironment);
    if !options.is_profiling_enabled() {
        info!(process = %args.process, "profiling disabled, nothing to replay");
        if !quiet {
            println!("profiling disabled for {}", args.process);
        }
        return Ok(None);
    }

    let log = open_trace_log(args.output.as_deref(), options.target_dir.as_deref())?;
    let path = log.path().to_path_buf();
    let session = if options.dump_environment {
        SessionInfo::new().with_environment(ProcessEnvironment::snapshot())
    } else {
        SessionInfo::new()
    };

    let recorder = CoverageRecorder::new(Arc::new(options), log)?;
    recorder.start(&session)?;
    replay_events(&recorder, &events)?;
    let mut log = recorder.finish()?;
    log.close()?;

    info!(events = events.len(), path = %path.display(), "replay finished");
    if !quiet {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", path.display())?;
    }
    Ok(Some(path))
}
