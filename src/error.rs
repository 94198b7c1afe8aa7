use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::{EXIT_START_CANCELLED, LifecycleError};

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end a run early
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Lifecycle(e) if e.is_start_cancelled() => EXIT_START_CANCELLED,
            _ => 1,
        }
    }
}
