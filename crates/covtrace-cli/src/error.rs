//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Malformed line in an event script
    #[error("Script line {line}: {message}")]
    Script {
        /// 1-based line number
        line: usize,
        /// Error message
        message: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Recorder library error
    #[error("Recorder error: {0}")]
    Recorder(#[from] covtrace::RecorderError),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a script error for `line`
    #[must_use]
    pub fn script(line: usize, message: impl Into<String>) -> Self {
        Self::Script {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_names_line() {
        let err = CliError::script(7, "unknown event 'jump'");
        assert_eq!(err.to_string(), "Script line 7: unknown event 'jump'");
    }

    #[test]
    fn test_recorder_error_converts() {
        let err: CliError = covtrace::RecorderError::ReservedIdentifier.into();
        assert!(matches!(err, CliError::Recorder(_)));
        assert!(err.to_string().starts_with("Recorder error:"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: CliError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().contains("gone"));
    }
}
