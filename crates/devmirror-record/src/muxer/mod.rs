//! Container writers.
//!
//! A [`Muxer`] receives the configuration packet once as the container
//! header, then every frame with its final duration, then a trailer on a
//! clean finish. Both formats are streamable: nothing already written is
//! ever revisited, so a recording cut short stays readable.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use devmirror_types::{MediaPacket, Size};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RecordError;
use crate::packet::RecordPacket;

pub mod mkv;
pub mod mp4;

pub use mkv::MatroskaMuxer;
pub use mp4::Mp4Muxer;

/// Time base of every container written: one tick per microsecond.
pub const TIME_BASE_HZ: u32 = 1_000_000;

/// Sink for a single video track.
pub trait Muxer: Send + 'static {
    /// Write the container header from the codec configuration packet.
    fn write_header(&mut self, config: &MediaPacket) -> Result<(), RecordError>;

    /// Write one frame whose duration is known.
    fn write_packet(&mut self, packet: &RecordPacket) -> Result<(), RecordError>;

    /// Finish the container and flush it.
    fn write_trailer(&mut self) -> Result<(), RecordError>;
}

/// Selectable output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    #[serde(alias = "mkv")]
    Matroska,
    Mp4,
}

impl RecordFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Matroska => "matroska",
            Self::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordFormat {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mkv" | "matroska" => Ok(Self::Matroska),
            "mp4" => Ok(Self::Mp4),
            other => Err(RecordError::UnknownFormat(other.to_string())),
        }
    }
}

/// Create `path` and wrap it in a muxer for `format`.
pub fn open_file_muxer(
    format: RecordFormat,
    path: &Path,
    frame_size: Size,
) -> Result<Box<dyn Muxer>, RecordError> {
    let file = BufWriter::new(File::create(path)?);
    debug!(%format, path = %path.display(), %frame_size, "opened record file");
    Ok(match format {
        RecordFormat::Matroska => Box::new(MatroskaMuxer::new(file, frame_size)),
        RecordFormat::Mp4 => Box::new(Mp4Muxer::new(file, frame_size)),
    })
}

/// Saturating conversion for 32-bit container fields.
pub(crate) fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
