//! Lifecycle-specific error types

use thiserror::Error;

use super::Phase;

/// Type-erased error returned by callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Conventional exit status for a fatal startup failure (`EX_SOFTWARE`).
pub const EXIT_START_CANCELLED: u8 = 70;

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A phase name did not match any known phase
    #[error("Invalid lifecycle phase: {0}")]
    InvalidPhase(String),

    /// A callback was registered under a phase it does not belong to
    #[error("Callback '{callback}' is a {actual} callback and cannot be registered for {expected}")]
    PhaseMismatch {
        /// Name of the rejected callback
        callback: String,
        /// Phase the caller asked for
        expected: Phase,
        /// Phase the callback implements
        actual: Phase,
    },

    /// A pre-start callback failed and the start sequence was abandoned
    #[error("Pre-start callback '{callback}' cancelled start: {source}")]
    StartCancelled {
        /// Name of the callback that failed
        callback: String,
        /// The error it returned
        #[source]
        source: BoxError,
    },

    /// OS signal handlers could not be installed
    #[error("Failed to install signal handler: {0}")]
    SignalInstall(#[source] std::io::Error),
}

impl LifecycleError {
    /// Create a start cancellation error
    pub fn start_cancelled(callback: impl Into<String>, source: BoxError) -> Self {
        Self::StartCancelled {
            callback: callback.into(),
            source,
        }
    }

    /// Whether this error should terminate the process with [`EXIT_START_CANCELLED`]
    pub fn is_start_cancelled(&self) -> bool {
        matches!(self, Self::StartCancelled { .. })
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
