//! Record pipeline errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("recording has failed; packet rejected")]
    Failed,

    #[error("recorder already stopped")]
    Stopped,

    #[error("first packet is not a configuration packet")]
    MissingConfig,

    #[error("no frames were recorded")]
    Empty,

    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown record format: {0}")]
    UnknownFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
