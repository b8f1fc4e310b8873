//! Trace Records and Sinks
//!
//! A coverage trace is a line-oriented `key=value` file. The recorder emits
//! [`TraceRecord`]s into a [`TraceSink`]; [`TraceLog`] is the file-backed sink
//! and [`MemorySink`] keeps records in memory.

use super::{AssemblyInfo, MethodId, MethodRecord};
use crate::result::RecorderResult;
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Version line written at the top of every trace
pub const VERSION_DESCRIPTION: &str = concat!("Coverage recorder version ", env!("CARGO_PKG_VERSION"));

/// Timestamp format used in file names and `Started`/`Stopped` records
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%3f";

/// Format a timestamp the way trace files expect it
#[must_use]
pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time as a trace timestamp
#[must_use]
pub fn current_timestamp() -> String {
    format_timestamp(Local::now())
}

/// One line of a coverage trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    /// Informational message
    Info(String),
    /// Non-critical problem
    Warn(String),
    /// Error that does not stop tracing
    Error(String),
    /// Session start timestamp
    Started(String),
    /// Session stop timestamp
    Stopped(String),
    /// Profiled process path
    Process(String),
    /// One environment variable of the profiled process
    Environment {
        /// Variable name
        key: String,
        /// Variable value
        value: String,
    },
    /// Loaded assembly
    Assembly {
        /// Assembly metadata
        info: AssemblyInfo,
        /// Whether to include the file version
        with_file_version: bool,
        /// Whether to include the load path
        with_path: bool,
    },
    /// Jitted method
    Jitted(MethodRecord),
    /// Inlined method
    Inlined(MethodRecord),
    /// Entered method
    Called(MethodId),
    /// Test case started
    TestStart {
        /// Timestamp
        timestamp: String,
        /// Test name
        name: String,
    },
    /// Test case ended
    TestEnd {
        /// Timestamp
        timestamp: String,
        /// Test name
        name: String,
        /// Duration as reported by the orchestrator, possibly empty
        duration: String,
    },
}

impl TraceRecord {
    /// Key of the `key=value` line
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Info(_) => "Info",
            Self::Warn(_) => "Warn",
            Self::Error(_) => "Error",
            Self::Started(_) => "Started",
            Self::Stopped(_) => "Stopped",
            Self::Process(_) => "Process",
            Self::Environment { .. } => "Environment",
            Self::Assembly { .. } => "Assembly",
            Self::Jitted(_) => "Jitted",
            Self::Inlined(_) => "Inlined",
            Self::Called(_) => "Called",
            Self::TestStart { .. } | Self::TestEnd { .. } => "Test",
        }
    }

    /// Whether this record carries coverage data
    #[must_use]
    pub const fn is_coverage(&self) -> bool {
        matches!(self, Self::Jitted(_) | Self::Inlined(_) | Self::Called(_))
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.key())?;
        match self {
            Self::Info(message)
            | Self::Warn(message)
            | Self::Error(message)
            | Self::Started(message)
            | Self::Stopped(message)
            | Self::Process(message) => write!(f, "{message}"),
            Self::Environment { key, value } => write!(f, "{key}={value}"),
            Self::Assembly {
                info,
                with_file_version,
                with_path,
            } => {
                write!(
                    f,
                    "{}:{} Version:{}",
                    info.name,
                    info.ordinal,
                    info.version_string()
                )?;
                if *with_file_version {
                    if let Some(file_version) = &info.file_version {
                        write!(f, " FileVersion:{file_version}")?;
                    }
                }
                if *with_path {
                    if let Some(path) = &info.path {
                        write!(f, " Path:{path}")?;
                    }
                }
                Ok(())
            }
            Self::Jitted(record) | Self::Inlined(record) => {
                write!(f, "{}:{}", record.assembly, record.method)
            }
            Self::Called(method) => write!(f, "{method}"),
            Self::TestStart { timestamp, name } => write!(f, "Start:{timestamp}:{name}"),
            Self::TestEnd {
                timestamp,
                name,
                duration,
            } => write!(f, "End:{timestamp}:{name}:{duration}"),
        }
    }
}

/// Destination for trace records
pub trait TraceSink: Send {
    /// Append one record
    fn write(&mut self, record: &TraceRecord) -> RecorderResult<()>;

    /// Make everything written so far durable
    fn flush(&mut self) -> RecorderResult<()>;
}

/// File-backed trace sink
#[derive(Debug)]
pub struct TraceLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl TraceLog {
    /// Create `coverage_<timestamp>.txt` inside `target_dir`
    pub fn create(target_dir: &Path) -> RecorderResult<Self> {
        fs::create_dir_all(target_dir)?;
        let path = target_dir.join(format!("coverage_{}.txt", current_timestamp()));
        Self::create_at(path)
    }

    /// Create (or truncate) a trace file at an explicit path
    pub fn create_at(path: impl Into<PathBuf>) -> RecorderResult<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        tracing::info!(path = %path.display(), "trace file created");
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Path of the trace file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file; later writes are ignored
    pub fn close(&mut self) -> RecorderResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl TraceSink for TraceLog {
    fn write(&mut self, record: &TraceRecord) -> RecorderResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{record}")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> RecorderResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for TraceLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close trace file");
        }
    }
}

/// In-memory trace sink
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Vec<TraceRecord>,
    flushes: usize,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records written so far
    #[must_use]
    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    /// Records rendered as trace lines
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.records.iter().map(ToString::to_string).collect()
    }

    /// Number of flush calls
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl TraceSink for MemorySink {
    fn write(&mut self, record: &TraceRecord) -> RecorderResult<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> RecorderResult<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::coverage::AssemblyOrdinal;
    use chrono::TimeZone;

    #[test]
    fn test_method_record_lines() {
        let record = MethodRecord::new(MethodId::new(0x0600_0001), AssemblyOrdinal::new(3));
        assert_eq!(TraceRecord::Jitted(record).to_string(), "Jitted=3:100663297");
        assert_eq!(TraceRecord::Inlined(record).to_string(), "Inlined=3:100663297");
        assert_eq!(TraceRecord::Called(MethodId::new(9)).to_string(), "Called=9");
    }

    #[test]
    fn test_assembly_line_respects_flags() {
        let info = AssemblyInfo::new(AssemblyOrdinal::new(2), "Bank.Core", [1, 2, 0, 7])
            .with_file_version("1.2.0.7-beta")
            .with_path(r"c:\app\Bank.Core.dll");
        let plain = TraceRecord::Assembly {
            info: info.clone(),
            with_file_version: false,
            with_path: false,
        };
        assert_eq!(plain.to_string(), "Assembly=Bank.Core:2 Version:1.2.0.7");

        let full = TraceRecord::Assembly {
            info,
            with_file_version: true,
            with_path: true,
        };
        assert_eq!(
            full.to_string(),
            r"Assembly=Bank.Core:2 Version:1.2.0.7 FileVersion:1.2.0.7-beta Path:c:\app\Bank.Core.dll"
        );
    }

    #[test]
    fn test_test_case_lines() {
        let start = TraceRecord::TestStart {
            timestamp: "20240101_120000000".to_string(),
            name: "Suite::Login".to_string(),
        };
        assert_eq!(start.to_string(), "Test=Start:20240101_120000000:Suite::Login");

        let end = TraceRecord::TestEnd {
            timestamp: "20240101_120001000".to_string(),
            name: "Suite::Login".to_string(),
            duration: "153".to_string(),
        };
        assert_eq!(end.to_string(), "Test=End:20240101_120001000:Suite::Login:153");
    }

    #[test]
    fn test_timestamp_format() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        assert_eq!(format_timestamp(time), "20240309_070502000");
    }

    #[test]
    fn test_trace_log_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TraceLog::create(dir.path()).unwrap();
        let path = log.path().to_path_buf();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("coverage_"));

        log.write(&TraceRecord::Info("hello".to_string())).unwrap();
        log.write(&TraceRecord::Called(MethodId::new(5))).unwrap();
        log.close().unwrap();
        // closed logs ignore further writes
        log.write(&TraceRecord::Called(MethodId::new(6))).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().collect::<Vec<_>>(), vec!["Info=hello", "Called=5"]);
    }

    #[test]
    fn test_memory_sink_counts_flushes() {
        let mut sink = MemorySink::new();
        sink.write(&TraceRecord::Process("/bin/app".to_string())).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.lines(), vec!["Process=/bin/app"]);
        assert_eq!(sink.flush_count(), 1);
    }
}
