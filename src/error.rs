use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving and verifying the identity daemon
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Command could not be spawned or its output could not be read
    #[error("Command failed: {command} {args:?}")]
    CommandError {
        command: String,
        args: Vec<String>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Command ran but exited with a status the caller did not expect
    #[error("`{command} {}` exited with status {status}: {}", args.join(" "), stderr.trim())]
    UnexpectedExit {
        command: String,
        args: Vec<String>,
        status: i32,
        stderr: String,
    },

    /// Parsing failed for a specific data source
    #[error("Failed to parse {data_source}: {reason}")]
    ParseError {
        data_source: String,
        data: String,
        reason: String,
    },

    /// Invalid or unexpected data format
    #[error("Invalid format in {context}: expected {expected}, received '{received}'")]
    InvalidFormat {
        expected: String,
        received: String,
        context: String,
    },

    /// Timeout occurred during operation
    #[error("{operation} timed out after {timeout:?}")]
    TimeoutError { operation: String, timeout: Duration },

    /// Harness configuration or scenario definition is unusable
    #[error("Configuration error in {location}: {reason}")]
    ConfigError { location: String, reason: String },

    /// Daemon could not be started, stopped or configured
    #[error("Daemon {action} failed: {reason}")]
    DaemonError { action: String, reason: String },

    /// Backing directory could not be populated or cleared
    #[error("Provider {operation} failed: {reason}")]
    ProviderError { operation: String, reason: String },

    /// Observed daemon behaviour differs from the expectation
    #[error("Step {step} `{query}`: expected {expected}, observed {observed}")]
    AssertionFailed {
        step: usize,
        query: String,
        expected: String,
        observed: String,
    },
}

impl HarnessError {
    /// Create a command error
    pub fn command_error(command: &str, args: &[&str], message: &str) -> Self {
        HarnessError::CommandError {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            source: Box::new(std::io::Error::other(message.to_string())),
        }
    }

    /// Create an unexpected exit status error
    pub fn unexpected_exit(command: &str, args: &[&str], status: i32, stderr: &str) -> Self {
        HarnessError::UnexpectedExit {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            status,
            stderr: stderr.to_string(),
        }
    }

    /// Create a parse error
    pub fn parse_error(data_source: &str, data: &str, reason: &str) -> Self {
        HarnessError::ParseError {
            data_source: data_source.to_string(),
            data: data.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid format error
    pub fn invalid_format(expected: &str, received: &str, context: &str) -> Self {
        HarnessError::InvalidFormat {
            expected: expected.to_string(),
            received: received.to_string(),
            context: context.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout_error(operation: &str, timeout: Duration) -> Self {
        HarnessError::TimeoutError {
            operation: operation.to_string(),
            timeout,
        }
    }

    pub fn config_error(location: &str, reason: &str) -> Self {
        HarnessError::ConfigError {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn daemon_error(action: &str, reason: &str) -> Self {
        HarnessError::DaemonError {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn provider_error(operation: &str, reason: &str) -> Self {
        HarnessError::ProviderError {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an assertion failure for step `step`
    pub fn assertion_failed(step: usize, query: &str, expected: &str, observed: &str) -> Self {
        HarnessError::AssertionFailed {
            step,
            query: query.to_string(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// True when the error is a verification mismatch rather than an infrastructure problem
    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::AssertionFailed { .. })
    }
}

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_exit_display_includes_stderr() {
        let err = HarnessError::unexpected_exit(
            "sssctl",
            &["cache-expire", "-u", "user1"],
            1,
            "Unable to connect\n",
        );
        assert_eq!(
            err.to_string(),
            "`sssctl cache-expire -u user1` exited with status 1: Unable to connect"
        );
    }

    #[test]
    fn test_command_error_has_source() {
        let err = HarnessError::command_error("ssh", &["host"], "connection refused");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_is_assertion() {
        assert!(HarnessError::assertion_failed(3, "id user1", "found", "not found").is_assertion());
        assert!(!HarnessError::daemon_error("start", "unit missing").is_assertion());
    }
}
