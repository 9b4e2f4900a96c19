//! Session errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("tunnel setup failed: {0}")]
    Tunnel(String),

    #[error("could not connect to device: {0}")]
    Connect(String),

    #[error("device handshake failed: {0}")]
    Handshake(#[source] devmirror_protocol::ProtocolError),

    #[error("protocol error: {0}")]
    Protocol(#[from] devmirror_protocol::ProtocolError),

    #[error("bridge error: {0}")]
    Bridge(#[from] devmirror_bridge::BridgeError),

    #[error("clipboard error: {0}")]
    Clipboard(#[from] devmirror_clipboard::ClipboardError),

    #[error("record error: {0}")]
    Record(#[from] devmirror_record::RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
