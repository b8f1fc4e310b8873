//! Result and error types for Covtrace.

use thiserror::Error;

/// Result type for Covtrace operations
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Errors that can occur while recording coverage
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Zero is the empty-slot sentinel and can never be recorded
    #[error("Method identifier 0 is reserved and cannot be recorded")]
    ReservedIdentifier,

    /// The identifier set could not allocate its next table
    #[error("Failed to grow identifier set to {capacity} slots")]
    SetGrowth {
        /// Requested slot count
        capacity: usize,
    },

    /// Configuration document could not be parsed
    #[error("Failed to parse the config file: {message}")]
    ConfigParse {
        /// Error message
        message: String,
    },

    /// Endpoint address is not a `tcp://host:port` address
    #[error("Invalid endpoint address: {endpoint}")]
    InvalidEndpoint {
        /// The offending address
        endpoint: String,
    },

    /// Message framing or payload error
    #[error("Transport error: {message}")]
    Transport {
        /// Error message
        message: String,
    },

    /// No reply arrived in time
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// The session is still shared with a running worker
    #[error("Recording session is still in use by a background worker")]
    SessionActive,

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Create a config parse error
    #[must_use]
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether this error is transient and the operation may be retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecorderError::SetGrowth { capacity: 1 << 20 };
        assert_eq!(
            err.to_string(),
            "Failed to grow identifier set to 1048576 slots"
        );

        let err = RecorderError::config_parse("bad indentation");
        assert!(err.to_string().contains("bad indentation"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(RecorderError::Timeout { ms: 250 }.is_transient());
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(RecorderError::Io(refused).is_transient());
        assert!(!RecorderError::ReservedIdentifier.is_transient());
        assert!(!RecorderError::config_parse("x").is_transient());
    }
}
