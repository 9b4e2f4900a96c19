//! Protocol errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Unknown device message type. The stream has no sync markers, so the
    /// connection cannot recover from this.
    #[error("unknown device message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("message too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("stream closed unexpectedly")]
    StreamClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
