//! Test Orchestrator
//!
//! The orchestrating side of the test session protocol. It answers
//! registrations with a freshly allocated reply address, reports the running
//! test, and pushes `start:`/`end:` messages to every registered recorder.
//! Used by the `covtrace orchestrate` command and by integration tests.

use super::protocol::{InboundMessage, OrchestratorRequest, ACK};
use super::transport::{
    format_endpoint, read_frame, write_frame, MessageEndpoint, TcpEndpoint, TcpTransport, Transport,
};
use crate::result::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long the accept loop waits before re-checking the stop flag
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Recorder known to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredRecorder {
    /// Process id sent with the registration
    pub pid: String,
    /// Reply endpoint the recorder binds
    pub address: String,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    current_test: Option<String>,
    recorders: Vec<RegisteredRecorder>,
    requests: Vec<String>,
    accepting: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<OrchestratorState>,
    shutdown: AtomicBool,
}

impl Shared {
    fn answer(&self, request: &str) -> RecorderResult<String> {
        let mut state = self.state.lock();
        state.requests.push(request.to_string());
        let reply = match OrchestratorRequest::parse(request) {
            OrchestratorRequest::Register { pid } if state.accepting => {
                let address = allocate_reply_address()?;
                info!(pid = %pid, address = %address, "recorder registered");
                state.recorders.retain(|recorder| recorder.pid != pid);
                state.recorders.push(RegisteredRecorder {
                    pid,
                    address: address.clone(),
                });
                address
            }
            OrchestratorRequest::Register { pid } => {
                debug!(pid = %pid, "registration deferred");
                String::new()
            }
            OrchestratorRequest::TestName => state.current_test.clone().unwrap_or_default(),
            OrchestratorRequest::Disconnected => {
                info!("recorder disconnected");
                String::new()
            }
            OrchestratorRequest::Other(other) => {
                debug!(request = %other, "unknown request");
                String::new()
            }
        };
        Ok(reply)
    }

    fn serve(&self, endpoint: &TcpEndpoint) {
        while !self.shutdown.load(Ordering::Acquire) {
            let stream = match endpoint.accept_until(Instant::now() + POLL_TIMEOUT) {
                Ok(Some(stream)) => stream,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            if let Err(e) = self.handle(stream) {
                debug!(error = %e, "request not completed");
            }
        }
    }

    fn handle(&self, mut stream: std::net::TcpStream) -> RecorderResult<()> {
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;
        stream.set_write_timeout(Some(Duration::from_secs(1)))?;
        let request = read_frame(&mut stream)?;
        let reply = self.answer(&request)?;
        // Notifications close their side early; a failed reply is expected.
        let _ = write_frame(&mut stream, &reply);
        Ok(())
    }
}

/// Pick a free loopback port for a recorder to bind
fn allocate_reply_address() -> RecorderResult<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(format_endpoint(listener.local_addr()?))
}

/// Orchestrator serving the request endpoint on a background thread
#[derive(Debug)]
pub struct TestOrchestrator {
    shared: Arc<Shared>,
    request_endpoint: String,
    transport: TcpTransport,
    ack_timeout: Duration,
    worker: Option<JoinHandle<()>>,
}

impl TestOrchestrator {
    /// Bind `endpoint` (port 0 picks a free port) and start serving
    pub fn bind(endpoint: &str) -> RecorderResult<Self> {
        let listener = TcpEndpoint::bind(endpoint)?;
        let request_endpoint = listener.address();
        let shared = Arc::new(Shared {
            state: Mutex::new(OrchestratorState {
                accepting: true,
                ..OrchestratorState::default()
            }),
            shutdown: AtomicBool::new(false),
        });

        let worker_state = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("covtrace-orchestrator".to_string())
            .spawn(move || worker_state.serve(&listener))?;
        info!(endpoint = %request_endpoint, "test orchestrator listening");

        Ok(Self {
            shared,
            request_endpoint,
            transport: TcpTransport::new(),
            ack_timeout: Duration::from_secs(2),
            worker: Some(worker),
        })
    }

    /// Set how long to wait for a recorder's acknowledgement
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Address recorders send requests to
    #[must_use]
    pub fn request_endpoint(&self) -> &str {
        &self.request_endpoint
    }

    /// Answer registrations with an address (`true`) or with "not ready"
    pub fn set_accepting_registrations(&self, accepting: bool) {
        self.shared.state.lock().accepting = accepting;
    }

    /// Currently registered recorders
    #[must_use]
    pub fn registered(&self) -> Vec<RegisteredRecorder> {
        self.shared.state.lock().recorders.clone()
    }

    /// Name of the running test
    #[must_use]
    pub fn current_test(&self) -> Option<String> {
        self.shared.state.lock().current_test.clone()
    }

    /// Every request received so far, in arrival order
    #[must_use]
    pub fn received_requests(&self) -> Vec<String> {
        self.shared.state.lock().requests.clone()
    }

    /// Start a test and tell every registered recorder
    ///
    /// Returns the number of recorders that acknowledged.
    pub fn start_test(&self, name: &str) -> usize {
        self.shared.state.lock().current_test = Some(name.to_string());
        self.broadcast(&InboundMessage::TestStart {
            name: name.to_string(),
        })
    }

    /// End the running test with a duration text (may be empty)
    ///
    /// Returns the number of recorders that acknowledged, or `None` when no
    /// test was running.
    pub fn end_test(&self, duration: &str) -> Option<usize> {
        let name = self.shared.state.lock().current_test.take()?;
        Some(self.broadcast(&InboundMessage::TestEnd {
            name,
            duration: duration.to_string(),
        }))
    }

    fn broadcast(&self, message: &InboundMessage) -> usize {
        let wire = message.encode();
        self.registered()
            .iter()
            .filter(|recorder| match self.push(&recorder.address, &wire) {
                Ok(()) => true,
                Err(e) => {
                    warn!(pid = %recorder.pid, error = %e, "recorder did not acknowledge");
                    false
                }
            })
            .count()
    }

    fn push(&self, address: &str, message: &str) -> RecorderResult<()> {
        let reply = self.transport.request(address, message, self.ack_timeout)?;
        if reply == ACK {
            Ok(())
        } else {
            Err(RecorderError::transport(format!("unexpected reply '{reply}'")))
        }
    }

    /// Stop serving and wait for the worker
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("orchestrator worker panicked");
            }
        }
    }
}

impl Drop for TestOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
