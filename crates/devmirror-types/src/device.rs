//! Device identity, as announced in the session handshake.

use serde::{Deserialize, Serialize};

use crate::screen::Size;

/// Information the device sends on the video socket right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name (e.g. "Pixel 7").
    pub name: String,
    /// Initial frame size of the video stream.
    pub frame_size: Size,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_display() {
        let info = DeviceInfo {
            name: "Pixel 7".to_string(),
            frame_size: Size::new(1080, 2400),
        };
        assert_eq!(info.to_string(), "Pixel 7 (1080x2400)");
    }
}
