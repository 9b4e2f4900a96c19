//! Streamable Matroska writer.
//!
//! The Segment is written with an unknown size so the file never needs
//! seeking. Each frame goes into its own Cluster as a `BlockGroup` carrying
//! an explicit `BlockDuration`.

use std::io::Write;

use devmirror_types::{MediaPacket, Size};
use tracing::trace;
use uuid::Uuid;

use super::Muxer;
use crate::avc::{self, AvcConfig};
use crate::error::RecordError;
use crate::packet::RecordPacket;

// Element IDs, marker bits included.
const EBML: u32 = 0x1A45_DFA3;
const EBML_VERSION: u32 = 0x4286;
const EBML_READ_VERSION: u32 = 0x42F7;
const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
const DOC_TYPE: u32 = 0x4282;
const DOC_TYPE_VERSION: u32 = 0x4287;
const DOC_TYPE_READ_VERSION: u32 = 0x4285;
const SEGMENT: u32 = 0x1853_8067;
const INFO: u32 = 0x1549_A966;
const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;
const SEGMENT_UID: u32 = 0x73A4;
const TRACKS: u32 = 0x1654_AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const FLAG_LACING: u32 = 0x9C;
const CODEC_ID: u32 = 0x86;
const CODEC_PRIVATE: u32 = 0x63A2;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;
const CLUSTER: u32 = 0x1F43_B675;
const TIMESTAMP: u32 = 0xE7;
const BLOCK_GROUP: u32 = 0xA0;
const BLOCK: u32 = 0xA1;
const BLOCK_DURATION: u32 = 0x9B;
const REFERENCE_BLOCK: u32 = 0xFB;

/// Nanoseconds per timestamp tick: ticks are microseconds.
const NS_PER_TICK: u64 = 1000;
const TRACK_TYPE_VIDEO: u64 = 1;
const CODEC_AVC: &str = "V_MPEG4/ISO/AVC";
/// Size field meaning "unknown", for the live Segment.
const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Matroska writer for a single H.264 track.
pub struct MatroskaMuxer<W> {
    out: W,
    frame_size: Size,
    /// PTS of the first frame; timestamps are written relative to it.
    origin: Option<u64>,
    last_timestamp: Option<u64>,
}

impl<W: Write + Send + 'static> MatroskaMuxer<W> {
    pub fn new(out: W, frame_size: Size) -> Self {
        Self {
            out,
            frame_size,
            origin: None,
            last_timestamp: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> Muxer for MatroskaMuxer<W> {
    fn write_header(&mut self, config: &MediaPacket) -> Result<(), RecordError> {
        let avc = AvcConfig::parse(&config.data)?;

        let mut header = Vec::new();
        element(
            &mut header,
            EBML,
            &[
                uint_element(EBML_VERSION, 1),
                uint_element(EBML_READ_VERSION, 1),
                uint_element(EBML_MAX_ID_LENGTH, 4),
                uint_element(EBML_MAX_SIZE_LENGTH, 8),
                bytes_element(DOC_TYPE, b"matroska"),
                uint_element(DOC_TYPE_VERSION, 4),
                uint_element(DOC_TYPE_READ_VERSION, 2),
            ]
            .concat(),
        );

        write_id(&mut header, SEGMENT);
        header.extend_from_slice(&UNKNOWN_SIZE);

        let app = concat!("devmirror ", env!("CARGO_PKG_VERSION"));
        element(
            &mut header,
            INFO,
            &[
                uint_element(TIMESTAMP_SCALE, NS_PER_TICK),
                bytes_element(MUXING_APP, app.as_bytes()),
                bytes_element(WRITING_APP, app.as_bytes()),
                bytes_element(SEGMENT_UID, Uuid::new_v4().as_bytes()),
            ]
            .concat(),
        );

        let video = [
            uint_element(PIXEL_WIDTH, u64::from(self.frame_size.width)),
            uint_element(PIXEL_HEIGHT, u64::from(self.frame_size.height)),
        ]
        .concat();
        let track = [
            uint_element(TRACK_NUMBER, 1),
            uint_element(TRACK_UID, 1),
            uint_element(TRACK_TYPE, TRACK_TYPE_VIDEO),
            uint_element(FLAG_LACING, 0),
            bytes_element(CODEC_ID, CODEC_AVC.as_bytes()),
            bytes_element(CODEC_PRIVATE, &avc.decoder_record()),
            bytes_element(VIDEO, &video),
        ]
        .concat();
        element(&mut header, TRACKS, &bytes_element(TRACK_ENTRY, &track));

        self.out.write_all(&header)?;
        Ok(())
    }

    fn write_packet(&mut self, packet: &RecordPacket) -> Result<(), RecordError> {
        let origin = *self.origin.get_or_insert(packet.pts());
        let timestamp = packet.pts().saturating_sub(origin);
        let keyframe = avc::is_keyframe(packet.data());

        // track number 1 as a 1-byte vint, relative timestamp 0, no flags
        let mut block = vec![0x81, 0, 0, 0];
        block.extend_from_slice(&avc::to_length_prefixed(packet.data()));

        let mut group = bytes_element(BLOCK, &block);
        group.extend(uint_element(BLOCK_DURATION, packet.duration));
        if let (false, Some(last)) = (keyframe, self.last_timestamp) {
            let delta = i64::try_from(last).unwrap_or(i64::MAX)
                - i64::try_from(timestamp).unwrap_or(i64::MAX);
            group.extend(int_element(REFERENCE_BLOCK, delta));
        }

        let mut cluster = Vec::with_capacity(group.len() + 32);
        element(
            &mut cluster,
            CLUSTER,
            &[
                uint_element(TIMESTAMP, timestamp),
                bytes_element(BLOCK_GROUP, &group),
            ]
            .concat(),
        );
        self.out.write_all(&cluster)?;
        self.last_timestamp = Some(timestamp);
        trace!(timestamp, duration = packet.duration, keyframe, "wrote cluster");
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), RecordError> {
        self.out.flush()?;
        Ok(())
    }
}

fn write_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.extend_from_slice(&bytes[skip..]);
}

/// Encode `len` as an EBML variable-size integer of minimal width.
fn write_size(out: &mut Vec<u8>, len: u64) {
    let mut width = 1;
    // all-ones is reserved for "unknown"
    while width < 8 && len >= (1u64 << (7 * width)) - 1 {
        width += 1;
    }
    let marked = len | (1u64 << (7 * width));
    out.extend_from_slice(&marked.to_be_bytes()[8 - width..]);
}

fn element(out: &mut Vec<u8>, id: u32, payload: &[u8]) {
    write_id(out, id);
    write_size(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

fn bytes_element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 12);
    element(&mut out, id, payload);
    out
}

fn uint_element(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    bytes_element(id, &bytes[skip..])
}

fn int_element(id: u32, value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // drop redundant sign-extension bytes
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes_element(id, &bytes[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::tests::config_packet;

    fn size_bytes(len: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_size(&mut out, len);
        out
    }

    #[test]
    fn vint_sizes() {
        assert_eq!(size_bytes(0), vec![0x80]);
        assert_eq!(size_bytes(5), vec![0x85]);
        assert_eq!(size_bytes(126), vec![0xFE]);
        // 127 would be all-ones in one byte
        assert_eq!(size_bytes(127), vec![0x40, 0x7F]);
        assert_eq!(size_bytes(300), vec![0x41, 0x2C]);
    }

    #[test]
    fn integer_elements_are_minimal() {
        assert_eq!(uint_element(0xD7, 1), vec![0xD7, 0x81, 0x01]);
        assert_eq!(uint_element(0xD7, 0), vec![0xD7, 0x81, 0x00]);
        assert_eq!(
            uint_element(0x2A_D7B1, 1000),
            vec![0x2A, 0xD7, 0xB1, 0x82, 0x03, 0xE8]
        );
        assert_eq!(int_element(0xFB, -1), vec![0xFB, 0x81, 0xFF]);
        assert_eq!(int_element(0xFB, -200), vec![0xFB, 0x82, 0xFF, 0x38]);
        assert_eq!(int_element(0xFB, 100), vec![0xFB, 0x81, 0x64]);
    }

    #[test]
    fn header_starts_with_ebml_and_carries_codec() {
        let mut muxer = MatroskaMuxer::new(Vec::new(), Size::new(1080, 1920));
        muxer
            .write_header(&MediaPacket::config(config_packet()))
            .unwrap();
        let out = muxer.into_inner();

        assert_eq!(&out[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        let find = |needle: &[u8]| out.windows(needle.len()).any(|w| w == needle);
        assert!(find(b"matroska"));
        assert!(find(CODEC_AVC.as_bytes()));
        assert!(find(&[0x18, 0x53, 0x80, 0x67, 0x01, 0xFF]));
        // PixelWidth 1080
        assert!(find(&[0xB0, 0x82, 0x04, 0x38]));
    }

    #[test]
    fn header_rejects_non_avc_config() {
        let mut muxer = MatroskaMuxer::new(Vec::new(), Size::new(1, 1));
        assert!(matches!(
            muxer.write_header(&MediaPacket::config(vec![1, 2, 3])),
            Err(RecordError::InvalidConfig(_))
        ));
    }

    #[test]
    fn frames_become_clusters_with_durations() {
        let mut muxer = MatroskaMuxer::new(Vec::new(), Size::new(16, 16));
        let frame = MediaPacket::frame(5_000, vec![0, 0, 0, 1, 0x65, 0xAB]);
        muxer.write_packet(&RecordPacket::new(frame, 33_333)).unwrap();
        let out = muxer.into_inner();

        assert_eq!(&out[..4], &[0x1F, 0x43, 0xB6, 0x75]);
        let find = |needle: &[u8]| out.windows(needle.len()).any(|w| w == needle);
        // first frame is at timestamp 0
        assert!(find(&[0xE7, 0x81, 0x00]));
        // BlockDuration 33333
        assert!(find(&[0x9B, 0x82, 0x82, 0x35]));
        // length-prefixed NAL in the block
        assert!(find(&[0x81, 0, 0, 0, 0, 0, 0, 2, 0x65, 0xAB]));
    }

    #[test]
    fn non_keyframes_reference_the_previous_block() {
        let mut muxer = MatroskaMuxer::new(Vec::new(), Size::new(16, 16));
        let key = MediaPacket::frame(100, vec![0, 0, 1, 0x65]);
        let delta = MediaPacket::frame(120, vec![0, 0, 1, 0x41]);
        muxer.write_packet(&RecordPacket::new(key, 20)).unwrap();
        muxer.write_packet(&RecordPacket::new(delta, 20)).unwrap();
        let out = muxer.into_inner();
        let count = out.windows(3).filter(|w| *w == [0xFB, 0x81, 0xEC]).count();
        assert_eq!(count, 1);
    }
}
