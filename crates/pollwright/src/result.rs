//! Result and error types for Pollwright.

use crate::poll::TerminalOutcome;
use thiserror::Error;

/// Result type for Pollwright operations
pub type PollwrightResult<T> = Result<T, PollwrightError>;

/// Errors that can occur in Pollwright
#[derive(Debug, Error)]
pub enum PollwrightError {
    /// Poll configuration rejected before any attempt was made
    #[error("Invalid poll configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Poll session aborted through its cancel token
    #[error("Polling cancelled after {attempts} attempt(s) ({elapsed_ms}ms)")]
    Cancelled {
        /// Attempts consumed before cancellation
        attempts: u32,
        /// Elapsed time in milliseconds
        elapsed_ms: u64,
    },

    /// Caller asked for a satisfied session and got something else
    #[error("{description}: poll ended {outcome} after {attempts} attempt(s) ({elapsed_ms}ms)")]
    Unsatisfied {
        /// What was being polled for
        description: String,
        /// Terminal outcome reached
        outcome: TerminalOutcome,
        /// Attempts consumed
        attempts: u32,
        /// Elapsed time in milliseconds
        elapsed_ms: u64,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Selector matched nothing on the page
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// Selector that was queried
        selector: String,
    },

    /// Driver-level failure
    #[error("Driver error: {message}")]
    DriverError {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    NavigationError {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Dialog subscription failure
    #[error("Dialog error: {message}")]
    DialogError {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl PollwrightError {
    /// Shorthand for an [`PollwrightError::InvalidConfig`]
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Shorthand for a [`PollwrightError::DriverError`]
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::DriverError {
            message: message.into(),
        }
    }

    /// Whether this error came from the poller itself rather than a check
    #[must_use]
    pub const fn is_poller_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::Cancelled { .. })
    }
}
