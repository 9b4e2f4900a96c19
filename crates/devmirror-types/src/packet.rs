//! Elementary-stream packets.

use std::sync::Arc;

/// A single compressed video access unit as produced by the device encoder.
///
/// The payload is reference-counted so that several consumers (decoder,
/// recorder) can hold the same packet without copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Presentation timestamp in microseconds. `None` for codec
    /// configuration packets (SPS/PPS).
    pub pts: Option<u64>,
    pub data: Arc<[u8]>,
}

impl MediaPacket {
    /// A timestamped frame packet.
    pub fn frame(pts: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            pts: Some(pts),
            data: data.into(),
        }
    }

    /// A configuration packet (no timestamp).
    pub fn config(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            pts: None,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn is_config(&self) -> bool {
        self.pts.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_payload() {
        let packet = MediaPacket::frame(10, vec![1u8, 2, 3]);
        let copy = packet.clone();
        assert!(Arc::ptr_eq(&packet.data, &copy.data));
        assert!(!copy.is_config());
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn config_has_no_pts() {
        let packet = MediaPacket::config(vec![0u8, 0, 0, 1]);
        assert!(packet.is_config());
        assert_eq!(packet.pts, None);
    }
}
