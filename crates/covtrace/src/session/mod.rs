//! Test-Wise Session Synchronization
//!
//! ```text
//! ┌──────────────────┐  register / testname   ┌──────────────────────┐
//! │ TestOrchestrator │◄───────────────────────│                      │
//! │ (request socket) │                        │ TestSessionSynchron- │
//! │                  │── start: / end: ──────►│ izer (reply socket)  │──► TestEventHandler
//! └──────────────────┘         ack ◄──────────└──────────────────────┘
//! ```

mod orchestrator;
mod protocol;
mod synchronizer;
mod transport;

pub use orchestrator::{RegisteredRecorder, TestOrchestrator};
pub use protocol::{
    InboundMessage, OrchestratorRequest, ACK, DISCONNECTED_NOTIFICATION, DURATION_SCAN_WINDOW,
    END_PREFIX, REGISTER_PREFIX, START_PREFIX, TESTNAME_REQUEST,
};
pub use synchronizer::{SynchronizerConfig, TestEventHandler, TestSessionSynchronizer};
pub use transport::{
    format_endpoint, parse_endpoint, read_frame, write_frame, MessageEndpoint, TcpEndpoint,
    TcpTransport, Transport, MAX_FRAME_LEN, TCP_SCHEME,
};
