//! Method Coverage Recording
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  COVTRACE COVERAGE PIPELINE                                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  host events → CoverageRecorder → IdentifierSet (jit / inline)  │
//! │                       │         → DoubleBufferedCollector (entry)│
//! │                       └────────→ TraceSink (key=value lines)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod double_buffer;
mod hash;
mod id_set;
mod method;
mod recorder;
pub mod trace_log;

pub use double_buffer::{CollectorConfig, DoubleBufferedCollector};
pub use hash::AvalancheMix;
pub use id_set::{IdentifierSet, DEFAULT_CAPACITY_BITS, MAX_CAPACITY_BITS};
pub use method::{AssemblyInfo, AssemblyOrdinal, MethodId, MethodRecord};
pub use recorder::{CoverageRecorder, SessionInfo};
pub use trace_log::{MemorySink, TraceLog, TraceRecord, TraceSink};
