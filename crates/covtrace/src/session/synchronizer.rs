//! Test Session Synchronizer
//!
//! Runs one background thread that attaches to a test orchestrator and turns
//! its messages into [`TestEventHandler`] callbacks:
//!
//! 1. `register:<pid>` until the orchestrator answers with a reply address
//! 2. bind that address, ask for the test already in progress
//! 3. receive pushed `start:`/`end:` messages, acknowledging each one
//! 4. on stop, send `profiler_disconnected` best-effort
//!
//! Connection problems are reported through
//! [`TestEventHandler::on_recoverable_error`] and retried. They never stop the
//! recording session.

use super::protocol::{
    InboundMessage, OrchestratorRequest, ACK, DISCONNECTED_NOTIFICATION, TESTNAME_REQUEST,
};
use super::transport::{MessageEndpoint, Transport};
use crate::config::OptionsSnapshot;
use crate::result::RecorderResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Receiver of test boundary events
pub trait TestEventHandler: Send + Sync {
    /// A test case started
    fn on_test_start(&self, name: &str);

    /// A test case ended; `duration` may be empty
    fn on_test_end(&self, name: &str, duration: &str);

    /// A problem that did not stop the session
    fn on_recoverable_error(&self, message: &str);
}

/// Synchronizer timing
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Orchestrator request endpoint
    pub request_endpoint: String,
    /// Process id sent with the registration
    pub pid: u32,
    /// Wait between registration attempts
    pub register_backoff: Duration,
    /// Reply timeout for requests to the orchestrator
    pub request_timeout: Duration,
    /// Bounded receive timeout; also bounds shutdown latency
    pub receive_timeout: Duration,
}

impl SynchronizerConfig {
    /// Config for `request_endpoint` and the current process
    #[must_use]
    pub fn new(request_endpoint: impl Into<String>) -> Self {
        Self {
            request_endpoint: request_endpoint.into(),
            pid: std::process::id(),
            register_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_millis(250),
            receive_timeout: Duration::from_millis(250),
        }
    }

    /// Config taken from resolved options
    #[must_use]
    pub fn from_options(options: &OptionsSnapshot) -> Self {
        Self::new(options.tia_request_socket.clone())
    }

    /// Override the process id
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Set the registration retry backoff
    #[must_use]
    pub const fn with_register_backoff(mut self, backoff: Duration) -> Self {
        self.register_backoff = backoff;
        self
    }

    /// Set the request reply timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the receive timeout
    #[must_use]
    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

struct Worker<T: Transport> {
    transport: T,
    handler: Arc<dyn TestEventHandler>,
    config: SynchronizerConfig,
    shutdown: Arc<AtomicBool>,
}

impl<T: Transport> Worker<T> {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sleep in short slices so a stop request is noticed quickly
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }

    fn register(&self) -> Option<T::Endpoint> {
        let request = OrchestratorRequest::register(self.config.pid);
        while !self.stopping() {
            match self.transport.request(
                &self.config.request_endpoint,
                &request,
                self.config.request_timeout,
            ) {
                Ok(address) if address.is_empty() => {
                    self.handler.on_recoverable_error(&format!(
                        "Test orchestrator at {} is not ready, retrying",
                        self.config.request_endpoint
                    ));
                }
                Ok(address) => match self.transport.bind(&address) {
                    Ok(endpoint) => {
                        info!(address = %endpoint.address(), "registered with test orchestrator");
                        return Some(endpoint);
                    }
                    Err(e) => self
                        .handler
                        .on_recoverable_error(&format!("Failed to bind reply endpoint {address}: {e}")),
                },
                Err(e) => self.handler.on_recoverable_error(&format!(
                    "Failed to register with test orchestrator at {}: {e}",
                    self.config.request_endpoint
                )),
            }
            self.pause(self.config.register_backoff);
        }
        None
    }

    fn current_test(&self) {
        match self.transport.request(
            &self.config.request_endpoint,
            TESTNAME_REQUEST,
            self.config.request_timeout,
        ) {
            Ok(name) if !name.is_empty() => {
                debug!(test = %name, "test already running");
                self.handler.on_test_start(&name);
            }
            Ok(_) => {}
            Err(e) => self
                .handler
                .on_recoverable_error(&format!("Failed to query the current test: {e}")),
        }
    }

    fn dispatch(&self, message: &str) {
        match InboundMessage::parse(message) {
            InboundMessage::TestStart { name } => self.handler.on_test_start(&name),
            InboundMessage::TestEnd { name, duration } => {
                self.handler.on_test_end(&name, &duration);
            }
            InboundMessage::Unknown(other) => debug!(message = %other, "ignoring unknown message"),
        }
    }

    fn receive_loop(&self, endpoint: &mut T::Endpoint) {
        while !self.stopping() {
            match endpoint.receive(self.config.receive_timeout) {
                Ok(None) => {}
                Ok(Some(message)) => {
                    // The ack confirms the boundary has been applied.
                    self.dispatch(&message);
                    if let Err(e) = endpoint.reply(ACK) {
                        warn!(error = %e, "failed to acknowledge message");
                    }
                }
                Err(e) if e.is_transient() => debug!(error = %e, "receive interrupted"),
                Err(e) => self
                    .handler
                    .on_recoverable_error(&format!("Failed to receive test event: {e}")),
            }
        }
    }

    fn run(self) {
        let Some(mut endpoint) = self.register() else {
            return;
        };
        self.current_test();
        self.receive_loop(&mut endpoint);

        if let Err(e) = self
            .transport
            .notify(&self.config.request_endpoint, DISCONNECTED_NOTIFICATION)
        {
            debug!(error = %e, "disconnect notification not delivered");
        }
    }
}

/// Background link to a test orchestrator
#[derive(Debug)]
pub struct TestSessionSynchronizer {
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TestSessionSynchronizer {
    /// Start the synchronizer thread
    pub fn start<T: Transport>(
        transport: T,
        handler: Arc<dyn TestEventHandler>,
        config: SynchronizerConfig,
    ) -> RecorderResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            transport,
            handler,
            config,
            shutdown: Arc::clone(&shutdown),
        };
        let handle = thread::Builder::new()
            .name("covtrace-session".to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            shutdown,
            worker: Some(handle),
        })
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("test session worker panicked");
            }
        }
    }

    /// Whether the thread has been stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.worker.is_none()
    }
}

impl Drop for TestSessionSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::result::RecorderError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Start(String),
        End(String, String),
        Error(String),
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<Event>>,
    }

    impl Recording {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn wait_for(&self, count: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.events.lock().len() < count && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    impl TestEventHandler for Recording {
        fn on_test_start(&self, name: &str) {
            self.events.lock().push(Event::Start(name.to_string()));
        }

        fn on_test_end(&self, name: &str, duration: &str) {
            self.events
                .lock()
                .push(Event::End(name.to_string(), duration.to_string()));
        }

        fn on_recoverable_error(&self, message: &str) {
            self.events.lock().push(Event::Error(message.to_string()));
        }
    }

    /// Scripted in-memory transport
    #[derive(Clone, Default)]
    struct FakeTransport {
        replies: Arc<Mutex<VecDeque<RecorderResult<String>>>>,
        inbound: Arc<Mutex<VecDeque<String>>>,
        requests: Arc<Mutex<Vec<String>>>,
        notifications: Arc<Mutex<Vec<String>>>,
        acks: Arc<Mutex<Vec<String>>>,
    }

    struct FakeEndpoint {
        inbound: Arc<Mutex<VecDeque<String>>>,
        acks: Arc<Mutex<Vec<String>>>,
    }

    impl MessageEndpoint for FakeEndpoint {
        fn receive(&mut self, timeout: Duration) -> RecorderResult<Option<String>> {
            if let Some(message) = self.inbound.lock().pop_front() {
                return Ok(Some(message));
            }
            thread::sleep(timeout);
            Ok(None)
        }

        fn reply(&mut self, message: &str) -> RecorderResult<()> {
            self.acks.lock().push(message.to_string());
            Ok(())
        }

        fn address(&self) -> String {
            "fake://reply".to_string()
        }
    }

    impl Transport for FakeTransport {
        type Endpoint = FakeEndpoint;

        fn request(&self, _endpoint: &str, message: &str, _timeout: Duration) -> RecorderResult<String> {
            self.requests.lock().push(message.to_string());
            self.replies.lock().pop_front().unwrap_or_else(|| Ok(String::new()))
        }

        fn notify(&self, _endpoint: &str, message: &str) -> RecorderResult<()> {
            self.notifications.lock().push(message.to_string());
            Ok(())
        }

        fn bind(&self, _endpoint: &str) -> RecorderResult<FakeEndpoint> {
            Ok(FakeEndpoint {
                inbound: Arc::clone(&self.inbound),
                acks: Arc::clone(&self.acks),
            })
        }
    }

    fn fast_config() -> SynchronizerConfig {
        SynchronizerConfig::new("fake://orchestrator")
            .with_pid(4711)
            .with_register_backoff(Duration::from_millis(5))
            .with_receive_timeout(Duration::from_millis(5))
    }

    #[test]
    fn test_start_and_end_messages_reach_handler() {
        let transport = FakeTransport::default();
        transport.replies.lock().extend([Ok("fake://reply".to_string()), Ok(String::new())]);
        transport
            .inbound
            .lock()
            .extend(["start:run-42".to_string(), "end:run-42:153".to_string()]);

        let handler = Arc::new(Recording::default());
        let mut sync =
            TestSessionSynchronizer::start(transport.clone(), handler.clone(), fast_config()).unwrap();
        handler.wait_for(2);
        sync.stop();

        assert_eq!(
            handler.events(),
            vec![
                Event::Start("run-42".to_string()),
                Event::End("run-42".to_string(), "153".to_string()),
            ]
        );
        assert_eq!(*transport.acks.lock(), vec!["ack", "ack"]);
        assert_eq!(
            transport.requests.lock()[..2],
            ["register:4711".to_string(), "testname".to_string()]
        );
        assert_eq!(*transport.notifications.lock(), vec!["profiler_disconnected"]);
    }

    #[test]
    fn test_registration_is_retried() {
        let transport = FakeTransport::default();
        transport.replies.lock().extend([
            Ok(String::new()),
            Err(RecorderError::Timeout { ms: 250 }),
            Ok("fake://reply".to_string()),
            Ok("already-running".to_string()),
        ]);

        let handler = Arc::new(Recording::default());
        let mut sync =
            TestSessionSynchronizer::start(transport.clone(), handler.clone(), fast_config()).unwrap();
        handler.wait_for(3);
        sync.stop();

        let events = handler.events();
        assert!(matches!(&events[0], Event::Error(m) if m.contains("not ready")));
        assert!(matches!(&events[1], Event::Error(m) if m.contains("timed out")));
        assert_eq!(events[2], Event::Start("already-running".to_string()));
        assert_eq!(transport.requests.lock().len(), 4);
    }

    #[test]
    fn test_stop_while_unregistered_sends_no_notification() {
        let transport = FakeTransport::default();
        let handler = Arc::new(Recording::default());
        let mut sync =
            TestSessionSynchronizer::start(transport.clone(), handler.clone(), fast_config()).unwrap();
        handler.wait_for(1);
        sync.stop();
        assert!(sync.is_stopped());
        assert!(transport.notifications.lock().is_empty());
        assert!(handler
            .events()
            .iter()
            .all(|event| matches!(event, Event::Error(_))));
    }
}
