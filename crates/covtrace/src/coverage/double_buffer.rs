//! Double-Buffered Entry Collection
//!
//! Method-entry events arrive on arbitrary host threads, once per call. The
//! hot path only appends to the current front buffer; a background thread
//! periodically flips the front/back labels and drains the back buffer into
//! the deduplicating [`IdentifierSet`].
//!
//! The front label is a generation counter read atomically by appenders
//! (`generation & 1` selects the buffer). An appender that loaded the old
//! generation just before a flip still targets the buffer that is about to be
//! drained. Each buffer sits behind its own mutex, held by a drain only long
//! enough to take the buffer's contents, so such a late append either lands
//! before the take or stays behind for the next cycle. Absorbing into the set
//! happens with every buffer lock released. The grace delay after a flip
//! keeps contention rare.

use super::IdentifierSet;
use crate::result::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Collector timing and memory configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Sleep when both buffers are empty
    pub idle_interval: Duration,
    /// Delay between flipping buffers and draining the old front
    pub grace_delay: Duration,
    /// Buffer capacity above which a drained buffer is shrunk
    pub shrink_threshold: usize,
    /// Initial size exponent of the durable set
    pub set_capacity_bits: u32,
    /// Size exponent the identifier sets may never grow beyond
    pub max_set_bits: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(10),
            grace_delay: Duration::from_millis(5),
            shrink_threshold: 2_000_000,
            set_capacity_bits: super::id_set::DEFAULT_CAPACITY_BITS,
            max_set_bits: super::id_set::MAX_CAPACITY_BITS,
        }
    }
}

impl CollectorConfig {
    /// Create a new default config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle sleep interval
    #[must_use]
    pub const fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Set the post-flip grace delay
    #[must_use]
    pub const fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    /// Set the buffer shrink threshold
    #[must_use]
    pub const fn with_shrink_threshold(mut self, threshold: usize) -> Self {
        self.shrink_threshold = threshold;
        self
    }

    /// Set the durable set's initial size exponent
    #[must_use]
    pub const fn with_set_capacity_bits(mut self, bits: u32) -> Self {
        self.set_capacity_bits = bits;
        self
    }

    /// Cap identifier set growth at `2^bits` slots
    #[must_use]
    pub const fn with_max_set_bits(mut self, bits: u32) -> Self {
        self.max_set_bits = bits;
        self
    }
}

/// Deduplicated identifiers plus those not yet handed out
#[derive(Debug)]
struct Durable {
    set: IdentifierSet,
    fresh: Vec<u64>,
    degraded: bool,
}

impl Durable {
    fn absorb(&mut self, batch: &[u64]) {
        if self.degraded {
            return;
        }
        for &id in batch {
            match self.set.insert(id) {
                Ok(true) => self.fresh.push(id),
                Ok(false) | Err(RecorderError::ReservedIdentifier) => {}
                Err(e) => {
                    error!(error = %e, "entered-method set exhausted, coverage is incomplete");
                    self.degraded = true;
                    return;
                }
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    buffers: [Mutex<Vec<u64>>; 2],
    generation: AtomicUsize,
    swap_lock: Mutex<()>,
    /// Serializes drains so `drain_now` returns only after an in-flight
    /// worker drain has been absorbed
    drain_lock: Mutex<()>,
    durable: Mutex<Durable>,
    shutdown: AtomicBool,
    swaps: AtomicU64,
    config: CollectorConfig,
}

impl Shared {
    fn new(config: CollectorConfig) -> Self {
        Self {
            buffers: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            generation: AtomicUsize::new(0),
            swap_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
            durable: Mutex::new(Durable {
                set: IdentifierSet::with_capacity_limits(
                    config.set_capacity_bits,
                    config.max_set_bits,
                ),
                fresh: Vec::new(),
                degraded: false,
            }),
            shutdown: AtomicBool::new(false),
            swaps: AtomicU64::new(0),
            config,
        }
    }

    fn is_idle(&self) -> bool {
        self.buffers.iter().all(|buffer| buffer.lock().is_empty())
    }

    /// Flip front/back and return the index of the new back buffer
    fn swap(&self) -> usize {
        let _guard = self.swap_lock.lock();
        let previous = self.generation.fetch_add(1, Ordering::AcqRel);
        self.swaps.fetch_add(1, Ordering::Relaxed);
        previous & 1
    }

    /// Caller holds `drain_lock`. The buffer lock is held only for the O(1)
    /// take and the hand-back of the emptied allocation.
    fn drain_locked(&self, index: usize) {
        let mut batch = std::mem::take(&mut *self.buffers[index].lock());
        if batch.is_empty() {
            return;
        }
        self.durable.lock().absorb(&batch);
        if batch.capacity() > self.config.shrink_threshold {
            return;
        }
        batch.clear();
        let mut buffer = self.buffers[index].lock();
        if buffer.is_empty() && buffer.capacity() < batch.capacity() {
            std::mem::swap(&mut *buffer, &mut batch);
        }
    }

    fn drain(&self, index: usize) {
        let _drain = self.drain_lock.lock();
        self.drain_locked(index);
    }

    fn drain_all(&self) {
        let _drain = self.drain_lock.lock();
        self.drain_locked(0);
        self.drain_locked(1);
    }

    fn run(&self) {
        debug!("entry drain worker started");
        while !self.shutdown.load(Ordering::Acquire) {
            if self.is_idle() {
                thread::sleep(self.config.idle_interval);
                continue;
            }
            let back = self.swap();
            thread::sleep(self.config.grace_delay);
            self.drain(back);
        }
        debug!("entry drain worker stopped");
    }
}

/// Hot-path entry collector draining into a durable exact set
#[derive(Debug)]
pub struct DoubleBufferedCollector {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DoubleBufferedCollector {
    /// Create the collector and start its drain thread
    pub fn start(config: CollectorConfig) -> RecorderResult<Self> {
        let shared = Arc::new(Shared::new(config));

        let worker_state = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("covtrace-drain".to_string())
            .spawn(move || worker_state.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Record a method entry. Never blocks on I/O.
    #[inline]
    pub fn append(&self, id: u64) {
        debug_assert_ne!(id, 0, "the empty-slot sentinel cannot be recorded");
        if id == 0 {
            return;
        }
        let front = self.shared.generation.load(Ordering::Acquire) & 1;
        self.shared.buffers[front].lock().push(id);
    }

    /// Drain both buffers into the durable set right now
    pub fn drain_now(&self) {
        self.shared.drain_all();
    }

    /// Identifiers that entered the durable set since the last call
    #[must_use]
    pub fn take_fresh(&self) -> Vec<u64> {
        std::mem::take(&mut self.shared.durable.lock().fresh)
    }

    /// Drain, hand out everything not yet handed out, and start a new
    /// segment with an empty durable set
    #[must_use]
    pub fn finish_segment(&self) -> Vec<u64> {
        self.shared.drain_all();
        let mut durable = self.shared.durable.lock();
        let fresh = std::mem::take(&mut durable.fresh);
        durable.set.clear();
        fresh
    }

    /// Whether the durable set currently holds `id`
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.shared.durable.lock().set.contains(id)
    }

    /// Number of distinct identifiers in the durable set
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.durable.lock().set.len()
    }

    /// Whether the durable set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether set growth failed and entries are being dropped
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.shared.durable.lock().degraded
    }

    /// Number of buffer flips performed by the drain thread
    #[must_use]
    pub fn swap_count(&self) -> u64 {
        self.shared.swaps.load(Ordering::Relaxed)
    }

    /// Stop the drain thread and drain whatever is still buffered
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("entry drain worker panicked");
            }
        }
        self.shared.drain_all();
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.worker.lock().is_none()
    }
}

impl Drop for DoubleBufferedCollector {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.shutdown();
        }
    }
}
