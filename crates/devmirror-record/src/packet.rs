//! Packets annotated with their display duration.

use devmirror_types::MediaPacket;

/// A timestamped frame whose duration has been derived from its successor.
#[derive(Debug, Clone)]
pub struct RecordPacket {
    pub packet: MediaPacket,
    /// Duration in microseconds.
    pub duration: u64,
}

impl RecordPacket {
    pub fn new(packet: MediaPacket, duration: u64) -> Self {
        Self { packet, duration }
    }

    /// Presentation timestamp in microseconds.
    pub fn pts(&self) -> u64 {
        self.packet.pts.unwrap_or(0)
    }

    pub fn data(&self) -> &[u8] {
        &self.packet.data
    }
}
