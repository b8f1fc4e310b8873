//! Coverage Recorder
//!
//! Owns every piece of per-session state: the jitted and inlined identifier
//! sets, the entry collector, the pending record queue and the trace sink.
//! The host adapter calls the `on_*` methods; the optional test session link
//! delivers test boundaries through [`TestEventHandler`].
//!
//! ```text
//! on_jitted / on_inlined ──► IdentifierSet ──► pending ──┐
//! on_assembly_loaded ─────────────────────────► pending ──┼──► TraceSink
//! on_method_entered ──► DoubleBufferedCollector ──────────┘
//!                          ▲ finish_segment
//! TestSessionSynchronizer ─┘ (test start / end)
//! ```

use super::double_buffer::{CollectorConfig, DoubleBufferedCollector};
use super::trace_log::{current_timestamp, TraceRecord, TraceSink, VERSION_DESCRIPTION};
use super::{
    AssemblyInfo, AssemblyOrdinal, IdentifierSet, MethodId, MethodRecord, DEFAULT_CAPACITY_BITS,
};
use crate::config::OptionsSnapshot;
use crate::result::{RecorderError, RecorderResult};
use crate::session::{SynchronizerConfig, TestEventHandler, TestSessionSynchronizer, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Warning written once when coverage can no longer be complete
const INCOMPLETE_COVERAGE: &str =
    "Coverage is incomplete: the method set could not grow and further methods are dropped";

/// Closing line of every trace
const SHUTDOWN_MESSAGE: &str = "Shutting down coverage recorder";

/// What the adapter knows about the profiled process
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Environment variables, written when `dump_environment` is on
    pub environment: Vec<(String, String)>,
}

impl SessionInfo {
    /// Session without environment data
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the process environment
    #[must_use]
    pub fn with_environment(mut self, environment: Vec<(String, String)>) -> Self {
        self.environment = environment;
        self
    }
}

#[derive(Debug)]
struct RecorderState<S> {
    sink: S,
    jitted: IdentifierSet,
    inlined: IdentifierSet,
    pending: Vec<TraceRecord>,
    current_test: Option<String>,
    degraded: bool,
    degradation_reported: bool,
    started: bool,
}

/// Session state shared with the test session thread
struct RecorderCore<S: TraceSink> {
    options: Arc<OptionsSnapshot>,
    collector: Option<DoubleBufferedCollector>,
    state: Mutex<RecorderState<S>>,
}

impl<S: TraceSink> RecorderCore<S> {
    fn is_active(&self) -> bool {
        self.options.is_profiling_enabled()
    }

    /// Queue a method record if the identifier is new to its set
    fn record_method(
        &self,
        method: MethodId,
        assembly: AssemblyOrdinal,
        inlined: bool,
    ) -> RecorderResult<()> {
        debug_assert!(!method.is_reserved(), "the empty-slot sentinel cannot be recorded");
        if method.is_reserved() {
            return Err(RecorderError::ReservedIdentifier);
        }
        if !self.is_active() {
            return Ok(());
        }

        let mut state = self.state.lock();
        if state.degraded {
            return Ok(());
        }
        let set = if inlined {
            &mut state.inlined
        } else {
            &mut state.jitted
        };
        match set.insert(method.as_u64()) {
            Ok(true) => {
                let record = MethodRecord::new(method, assembly);
                state.pending.push(if inlined {
                    TraceRecord::Inlined(record)
                } else {
                    TraceRecord::Jitted(record)
                });
            }
            Ok(false) => return Ok(()),
            Err(e) => {
                error!(error = %e, "method set exhausted");
                state.degraded = true;
                return self.flush_locked(&mut state);
            }
        }

        match self.options.eager_flush_threshold() {
            Some(threshold) if state.pending.len() >= threshold => self.flush_locked(&mut state),
            _ => Ok(()),
        }
    }

    fn write_entered(&self, state: &mut RecorderState<S>, ids: Vec<u64>) -> RecorderResult<()> {
        for id in ids {
            state.sink.write(&TraceRecord::Called(MethodId::new(id)))?;
        }
        Ok(())
    }

    /// Write pending records and new entered identifiers
    fn flush_locked(&self, state: &mut RecorderState<S>) -> RecorderResult<()> {
        for record in std::mem::take(&mut state.pending) {
            state.sink.write(&record)?;
        }
        if let Some(collector) = &self.collector {
            collector.drain_now();
            let fresh = collector.take_fresh();
            self.write_entered(state, fresh)?;
        }
        let entries_degraded = self
            .collector
            .as_ref()
            .is_some_and(DoubleBufferedCollector::is_degraded);
        if (state.degraded || entries_degraded) && !state.degradation_reported {
            state.degradation_reported = true;
            state.sink.write(&TraceRecord::Warn(INCOMPLETE_COVERAGE.to_string()))?;
        }
        state.sink.flush()
    }

    /// Flush and start a new entered segment
    fn close_segment(&self, state: &mut RecorderState<S>) -> RecorderResult<()> {
        self.flush_locked(state)?;
        if let Some(collector) = &self.collector {
            let rest = collector.finish_segment();
            self.write_entered(state, rest)?;
        }
        Ok(())
    }

    fn test_started(&self, name: &str) -> RecorderResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if let Some(previous) = state.current_test.take() {
            warn!(test = %previous, "test started before the previous one ended");
            self.close_segment(&mut state)?;
            state.sink.write(&TraceRecord::TestEnd {
                timestamp: current_timestamp(),
                name: previous,
                duration: String::new(),
            })?;
        }
        // Everything entered so far belongs to no test.
        self.close_segment(&mut state)?;
        state.sink.write(&TraceRecord::TestStart {
            timestamp: current_timestamp(),
            name: name.to_string(),
        })?;
        state.current_test = Some(name.to_string());
        state.sink.flush()
    }

    fn test_ended(&self, name: &str, duration: &str) -> RecorderResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if state.current_test.take().is_none() {
            debug!(test = %name, "end of a test that was never started");
        }
        self.close_segment(&mut state)?;
        state.sink.write(&TraceRecord::TestEnd {
            timestamp: current_timestamp(),
            name: name.to_string(),
            duration: duration.to_string(),
        })?;
        state.sink.flush()
    }
}

impl<S: TraceSink> TestEventHandler for RecorderCore<S> {
    fn on_test_start(&self, name: &str) {
        if let Err(e) = self.test_started(name) {
            error!(error = %e, test = %name, "failed to record test start");
        }
    }

    fn on_test_end(&self, name: &str, duration: &str) {
        if let Err(e) = self.test_ended(name, duration) {
            error!(error = %e, test = %name, "failed to record test end");
        }
    }

    fn on_recoverable_error(&self, message: &str) {
        warn!(problem = %message, "test session problem");
        if !self.is_active() {
            return;
        }
        let mut state = self.state.lock();
        if let Err(e) = state.sink.write(&TraceRecord::Error(message.to_string())) {
            error!(error = %e, "failed to write error record");
        }
    }
}

/// One recording session for one profiled process
pub struct CoverageRecorder<S: TraceSink + 'static> {
    core: Arc<RecorderCore<S>>,
    synchronizer: Option<TestSessionSynchronizer>,
}

impl<S: TraceSink + 'static> CoverageRecorder<S> {
    /// Create a recorder writing to `sink`
    pub fn new(options: Arc<OptionsSnapshot>, sink: S) -> RecorderResult<Self> {
        Self::with_collector_config(options, sink, CollectorConfig::default())
    }

    /// Create a recorder with explicit collector settings
    ///
    /// The collector thread only runs when entry tracking is enabled. The
    /// config's set ceiling also caps the jitted and inlined method sets.
    pub fn with_collector_config(
        options: Arc<OptionsSnapshot>,
        sink: S,
        collector_config: CollectorConfig,
    ) -> RecorderResult<Self> {
        let method_set =
            || IdentifierSet::with_capacity_limits(DEFAULT_CAPACITY_BITS, collector_config.max_set_bits);
        let state = RecorderState {
            sink,
            jitted: method_set(),
            inlined: method_set(),
            pending: Vec::new(),
            current_test: None,
            degraded: false,
            degradation_reported: false,
            started: false,
        };
        let collector = if options.is_profiling_enabled() && options.is_entry_tracking_enabled() {
            Some(DoubleBufferedCollector::start(collector_config)?)
        } else {
            None
        };
        Ok(Self {
            core: Arc::new(RecorderCore {
                options,
                collector,
                state: Mutex::new(state),
            }),
            synchronizer: None,
        })
    }

    /// Options the recorder runs with
    #[must_use]
    pub fn options(&self) -> &OptionsSnapshot {
        &self.core.options
    }

    /// Whether method entries are collected
    #[must_use]
    pub fn is_tracking_entries(&self) -> bool {
        self.core.collector.is_some()
    }

    /// Whether coverage has become incomplete
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.core.state.lock().degraded
            || self
                .core
                .collector
                .as_ref()
                .is_some_and(DoubleBufferedCollector::is_degraded)
    }

    /// Name of the test currently recorded into, if any
    #[must_use]
    pub fn current_test(&self) -> Option<String> {
        self.core.state.lock().current_test.clone()
    }

    /// Write the session header
    pub fn start(&self, session: &SessionInfo) -> RecorderResult<()> {
        if !self.core.is_active() {
            info!(process = %self.core.options.process_path, "profiling disabled for this process");
            return Ok(());
        }
        let options = &self.core.options;
        let mut state = self.core.state.lock();
        if state.started {
            return Ok(());
        }
        state.started = true;

        let sink = &mut state.sink;
        sink.write(&TraceRecord::Info(VERSION_DESCRIPTION.to_string()))?;
        sink.write(&TraceRecord::Started(current_timestamp()))?;
        sink.write(&TraceRecord::Process(options.process_path.clone()))?;
        sink.write(&TraceRecord::Info(format!(
            "Looking up configuration values from {}",
            options.config_path
        )))?;
        for problem in &options.problems {
            sink.write(&TraceRecord::Warn(problem.clone()))?;
        }
        if options.dump_environment {
            for (key, value) in &session.environment {
                sink.write(&TraceRecord::Environment {
                    key: key.clone(),
                    value: value.clone(),
                })?;
            }
        }
        sink.flush()?;
        info!(process = %options.process_path, "coverage recording started");
        Ok(())
    }

    /// Connect to the test orchestrator when test-wise segmentation is on
    ///
    /// Does nothing when it is off or a link already exists.
    pub fn attach_test_session<T: Transport>(
        &mut self,
        transport: T,
        config: SynchronizerConfig,
    ) -> RecorderResult<()> {
        if !self.core.is_active()
            || !self.core.options.is_tia_enabled()
            || self.synchronizer.is_some()
        {
            return Ok(());
        }
        let handler: Arc<dyn TestEventHandler> = self.core.clone();
        self.synchronizer = Some(TestSessionSynchronizer::start(transport, handler, config)?);
        Ok(())
    }

    /// A method was compiled
    pub fn on_jitted(&self, method: MethodId, assembly: AssemblyOrdinal) -> RecorderResult<()> {
        self.core.record_method(method, assembly, false)
    }

    /// A method was inlined into a caller
    pub fn on_inlined(&self, method: MethodId, assembly: AssemblyOrdinal) -> RecorderResult<()> {
        self.core.record_method(method, assembly, true)
    }

    /// A method was entered. Hot path: never blocks on I/O.
    #[inline]
    pub fn on_method_entered(&self, method: MethodId) {
        if let Some(collector) = &self.core.collector {
            collector.append(method.as_u64());
        }
    }

    /// An assembly was loaded
    pub fn on_assembly_loaded(&self, info: AssemblyInfo) {
        if !self.core.is_active() {
            return;
        }
        let options = &self.core.options;
        self.core.state.lock().pending.push(TraceRecord::Assembly {
            info,
            with_file_version: options.assembly_file_version,
            with_path: options.assembly_paths,
        });
    }

    /// A test case started
    pub fn on_test_start(&self, name: &str) -> RecorderResult<()> {
        self.core.test_started(name)
    }

    /// A test case ended
    pub fn on_test_end(&self, name: &str, duration: &str) -> RecorderResult<()> {
        self.core.test_ended(name, duration)
    }

    /// Write everything recorded since the last flush
    pub fn flush(&self) -> RecorderResult<()> {
        if !self.core.is_active() {
            return Ok(());
        }
        let mut state = self.core.state.lock();
        self.core.flush_locked(&mut state)
    }

    /// Stop all workers, write the remaining data and the trailer, and hand
    /// back the sink
    pub fn finish(mut self) -> RecorderResult<S> {
        if let Some(mut synchronizer) = self.synchronizer.take() {
            synchronizer.stop();
        }
        if let Some(collector) = &self.core.collector {
            collector.shutdown();
        }

        if self.core.is_active() {
            let mut state = self.core.state.lock();
            if let Some(test) = state.current_test.take() {
                warn!(test = %test, "session ended during a test");
                self.core.close_segment(&mut state)?;
                state.sink.write(&TraceRecord::TestEnd {
                    timestamp: current_timestamp(),
                    name: test,
                    duration: String::new(),
                })?;
            }
            self.core.flush_locked(&mut state)?;
            state.sink.write(&TraceRecord::Stopped(current_timestamp()))?;
            state.sink.write(&TraceRecord::Info(SHUTDOWN_MESSAGE.to_string()))?;
            state.sink.flush()?;
        }
        info!("coverage recording finished");

        let core = Arc::try_unwrap(self.core).map_err(|_| RecorderError::SessionActive)?;
        Ok(core.state.into_inner().sink)
    }
}

impl<S: TraceSink + 'static> std::fmt::Debug for CoverageRecorder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageRecorder")
            .field("process", &self.core.options.process_path)
            .field("tracking_entries", &self.is_tracking_entries())
            .field("test_session", &self.synchronizer.is_some())
            .finish()
    }
}
