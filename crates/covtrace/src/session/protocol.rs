//! Test Session Protocol
//!
//! Messages are short UTF-8 strings.
//!
//! | direction | message | reply |
//! |---|---|---|
//! | recorder → orchestrator | `register:<pid>` | reply address, or empty when not ready |
//! | recorder → orchestrator | `testname` | name of the running test, or empty |
//! | recorder → orchestrator | `profiler_disconnected` | none awaited |
//! | orchestrator → recorder | `start:<name>` | `ack` |
//! | orchestrator → recorder | `end:<name>:<duration>` | `ack` |

/// Registration request prefix
pub const REGISTER_PREFIX: &str = "register:";
/// Request for the currently running test
pub const TESTNAME_REQUEST: &str = "testname";
/// Notification sent when the recorder shuts down
pub const DISCONNECTED_NOTIFICATION: &str = "profiler_disconnected";
/// Test start message prefix
pub const START_PREFIX: &str = "start:";
/// Test end message prefix
pub const END_PREFIX: &str = "end:";
/// Acknowledgement for every pushed message
pub const ACK: &str = "ack";

/// How far from the end of an end message the duration separator may be
///
/// Test names may contain colons themselves; durations are short numbers.
pub const DURATION_SCAN_WINDOW: usize = 16;

/// Message pushed by the orchestrator to a registered recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// A test case started
    TestStart {
        /// Test name
        name: String,
    },
    /// A test case ended
    TestEnd {
        /// Test identifier
        name: String,
        /// Duration text, possibly empty
        duration: String,
    },
    /// Anything else; acknowledged and otherwise ignored
    Unknown(String),
}

impl InboundMessage {
    /// Classify a message by its prefix
    #[must_use]
    pub fn parse(message: &str) -> Self {
        if let Some(name) = message.strip_prefix(START_PREFIX) {
            return Self::TestStart {
                name: name.to_string(),
            };
        }
        if let Some(rest) = message.strip_prefix(END_PREFIX) {
            let (name, duration) = split_duration(rest);
            return Self::TestEnd {
                name: name.to_string(),
                duration: duration.to_string(),
            };
        }
        Self::Unknown(message.to_string())
    }

    /// Wire form of this message
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::TestStart { name } => format!("{START_PREFIX}{name}"),
            Self::TestEnd { name, duration } => format!("{END_PREFIX}{name}:{duration}"),
            Self::Unknown(message) => message.clone(),
        }
    }
}

/// Split `<name>:<duration>` at the last colon inside the scan window
///
/// Without a colon in the window the whole text is the name.
fn split_duration(rest: &str) -> (&str, &str) {
    let mut window_start = rest.len().saturating_sub(DURATION_SCAN_WINDOW);
    while !rest.is_char_boundary(window_start) {
        window_start += 1;
    }
    match rest[window_start..].rfind(':') {
        Some(offset) => {
            let colon = window_start + offset;
            (&rest[..colon], &rest[colon + 1..])
        }
        None => (rest, ""),
    }
}

/// Request sent by a recorder to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorRequest {
    /// `register:<pid>`
    Register {
        /// Process id as sent; not necessarily numeric
        pid: String,
    },
    /// `testname`
    TestName,
    /// `profiler_disconnected`
    Disconnected,
    /// Unrecognized request
    Other(String),
}

impl OrchestratorRequest {
    /// Classify a request
    #[must_use]
    pub fn parse(message: &str) -> Self {
        if let Some(pid) = message.strip_prefix(REGISTER_PREFIX) {
            return Self::Register {
                pid: pid.to_string(),
            };
        }
        match message {
            TESTNAME_REQUEST => Self::TestName,
            DISCONNECTED_NOTIFICATION => Self::Disconnected,
            other => Self::Other(other.to_string()),
        }
    }

    /// Registration request for process `pid`
    #[must_use]
    pub fn register(pid: u32) -> String {
        format!("{REGISTER_PREFIX}{pid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message() {
        assert_eq!(
            InboundMessage::parse("start:run-42"),
            InboundMessage::TestStart {
                name: "run-42".to_string()
            }
        );
    }

    #[test]
    fn test_end_message() {
        assert_eq!(
            InboundMessage::parse("end:run-42:153"),
            InboundMessage::TestEnd {
                name: "run-42".to_string(),
                duration: "153".to_string()
            }
        );
    }

    #[test]
    fn test_end_message_with_colons_in_name() {
        assert_eq!(
            InboundMessage::parse("end:Bank.Tests::Transfer::Overdraft:1200"),
            InboundMessage::TestEnd {
                name: "Bank.Tests::Transfer::Overdraft".to_string(),
                duration: "1200".to_string()
            }
        );
    }

    #[test]
    fn test_end_message_with_empty_duration() {
        assert_eq!(
            InboundMessage::parse("end:Suite.LongRunningTestName:"),
            InboundMessage::TestEnd {
                name: "Suite.LongRunningTestName".to_string(),
                duration: String::new()
            }
        );
    }

    #[test]
    fn test_end_message_without_colon_in_window() {
        // The only colon is further back than the scan window.
        let message = "end:a:very-long-test-identifier-without-duration";
        assert_eq!(
            InboundMessage::parse(message),
            InboundMessage::TestEnd {
                name: "a:very-long-test-identifier-without-duration".to_string(),
                duration: String::new()
            }
        );
    }

    #[test]
    fn test_end_message_with_multibyte_name() {
        let message = "end:prüfung-äöü-ß-ñ-日本語:42";
        assert_eq!(
            InboundMessage::parse(message),
            InboundMessage::TestEnd {
                name: "prüfung-äöü-ß-ñ-日本語".to_string(),
                duration: "42".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_message() {
        assert_eq!(
            InboundMessage::parse("ping"),
            InboundMessage::Unknown("ping".to_string())
        );
    }

    #[test]
    fn test_encode() {
        let end = InboundMessage::TestEnd {
            name: "a::b".to_string(),
            duration: "7".to_string(),
        };
        assert_eq!(end.encode(), "end:a::b:7");
        assert_eq!(InboundMessage::parse(&end.encode()), end);
    }

    #[test]
    fn test_orchestrator_requests() {
        assert_eq!(OrchestratorRequest::register(4711), "register:4711");
        assert_eq!(
            OrchestratorRequest::parse("register:4711"),
            OrchestratorRequest::Register {
                pid: "4711".to_string()
            }
        );
        assert_eq!(OrchestratorRequest::parse("testname"), OrchestratorRequest::TestName);
        assert_eq!(
            OrchestratorRequest::parse("profiler_disconnected"),
            OrchestratorRequest::Disconnected
        );
        assert_eq!(
            OrchestratorRequest::parse("hello"),
            OrchestratorRequest::Other("hello".to_string())
        );
    }
}
