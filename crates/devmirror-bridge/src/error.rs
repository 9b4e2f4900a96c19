//! Bridge subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("companion process error: {0}")]
    Companion(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
