//! Covtrace: In-Process Method Coverage Recording
//!
//! Records which methods of a managed runtime were compiled, inlined and
//! entered, deduplicates them with an exact open-addressing set, and writes
//! one `key=value` trace per profiled process. With test-wise segmentation on,
//! a test orchestrator announces test boundaries and the trace is split into
//! per-test sections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    COVTRACE Architecture                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌──────────────────┐    ┌────────────┐      │
//! │   │ Host       │    │ CoverageRecorder │    │ TraceLog   │      │
//! │   │ adapter    │───►│  IdentifierSet   │───►│ coverage_  │      │
//! │   │ events     │    │  DoubleBuffered  │    │ *.txt      │      │
//! │   └────────────┘    └──────────────────┘    └────────────┘      │
//! │         ▲                    ▲                                   │
//! │   ConfigResolver    TestSessionSynchronizer ◄── orchestrator     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use covtrace::{
//!     AssemblyOrdinal, ConfigResolver, CoverageRecorder, MemorySink, MethodId, NoEnvironment,
//!     SessionInfo,
//! };
//! use std::sync::Arc;
//!
//! let options = ConfigResolver::resolve("", "/usr/bin/app", &NoEnvironment);
//! let recorder = CoverageRecorder::new(Arc::new(options), MemorySink::new())?;
//! recorder.start(&SessionInfo::new())?;
//! recorder.on_jitted(MethodId::new(0x0600_0001), AssemblyOrdinal::new(1))?;
//! let sink = recorder.finish()?;
//! assert!(sink.lines().contains(&"Jitted=1:100663297".to_string()));
//! # Ok::<(), covtrace::RecorderError>(())
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod config;
pub mod coverage;
mod result;
pub mod session;

pub use config::{
    ConfigFile, ConfigResolver, EnvironmentReader, NoEnvironment, OptionsSnapshot,
    ProcessEnvironment, ProcessSection,
};
pub use coverage::{
    AssemblyInfo, AssemblyOrdinal, AvalancheMix, CollectorConfig, CoverageRecorder,
    DoubleBufferedCollector, IdentifierSet, MemorySink, MethodId, MethodRecord, SessionInfo,
    TraceLog, TraceRecord, TraceSink,
};
pub use result::{RecorderError, RecorderResult};
pub use session::{
    InboundMessage, SynchronizerConfig, TcpTransport, TestEventHandler, TestOrchestrator,
    TestSessionSynchronizer, Transport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
