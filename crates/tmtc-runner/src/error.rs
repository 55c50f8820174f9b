//! Error types for the device runner.

use thiserror::Error;
use tmtc_codec::CodecError;
use tmtc_protocol::{ConfigError, RouteError};

/// Errors raised while setting up or driving a device connection.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Route(#[from] RouteError),

    /// An operator command line could not be understood.
    #[error("invalid command '{line}': {reason}")]
    Command { line: String, reason: String },

    /// Command line options are inconsistent.
    #[error("invalid option: {0}")]
    Option(String),

    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;
