//! Error types for the daemon

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring the daemon or loading definitions
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// A definition file or directory could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A definition file is not a valid definition document
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The engine rejected an operation
    #[error("engine error: {0}")]
    Engine(#[from] flowline_types::WorkflowError),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
