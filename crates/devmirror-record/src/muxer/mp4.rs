//! Fragmented MP4 writer.
//!
//! The header is `ftyp` + `moov` with an empty sample table and a `mvex`
//! box; every frame is then written as its own `moof` + `mdat` fragment.

use std::io::Write;

use devmirror_types::{MediaPacket, Size};
use tracing::trace;

use super::{clamp_u32, Muxer, TIME_BASE_HZ};
use crate::avc::{self, AvcConfig};
use crate::error::RecordError;
use crate::packet::RecordPacket;

const TRACK_ID: u32 = 1;
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
const TRUN_DATA_OFFSET: u32 = 0x0001;
const TRUN_SAMPLE_DURATION: u32 = 0x0100;
const TRUN_SAMPLE_SIZE: u32 = 0x0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x0400;
const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// Fragmented MP4 writer for a single H.264 track.
pub struct Mp4Muxer<W> {
    out: W,
    frame_size: Size,
    sequence: u32,
    /// PTS of the first frame; decode times are written relative to it.
    origin: Option<u64>,
}

impl<W: Write + Send + 'static> Mp4Muxer<W> {
    pub fn new(out: W, frame_size: Size) -> Self {
        Self {
            out,
            frame_size,
            sequence: 0,
            origin: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn moov(&self, avc: &AvcConfig) -> Vec<u8> {
        let width = u32::from(self.frame_size.width);
        let height = u32::from(self.frame_size.height);

        let mut mvhd = Buf::default();
        mvhd.u32(0).u32(0).u32(TIME_BASE_HZ).u32(0);
        mvhd.u32(0x0001_0000).u16(0x0100).zeros(10);
        mvhd.matrix().zeros(24).u32(TRACK_ID + 1);

        let mut tkhd = Buf::default();
        tkhd.u32(0).u32(0).u32(TRACK_ID).u32(0).u32(0).zeros(8);
        tkhd.u16(0).u16(0).u16(0).u16(0).matrix();
        tkhd.u32(width << 16).u32(height << 16);

        let mut mdhd = Buf::default();
        // language "und"
        mdhd.u32(0).u32(0).u32(TIME_BASE_HZ).u32(0).u16(0x55C4).u16(0);

        let mut hdlr = Buf::default();
        hdlr.u32(0).bytes(b"vide").zeros(12).bytes(b"VideoHandler\0");

        let mut vmhd = Buf::default();
        vmhd.u16(0).zeros(6);

        let mut dref = Buf::default();
        dref.u32(1).bytes(&full_box(b"url ", 0, 1, &[]));

        let mut avc1 = Buf::default();
        avc1.zeros(6).u16(1).zeros(16);
        avc1.u16(self.frame_size.width).u16(self.frame_size.height);
        avc1.u32(0x0048_0000).u32(0x0048_0000).u32(0).u16(1).zeros(32);
        avc1.u16(0x0018).u16(0xFFFF);
        avc1.bytes(&plain_box(b"avcC", &avc.decoder_record()));

        let mut stsd = Buf::default();
        stsd.u32(1).bytes(&plain_box(b"avc1", &avc1.0));

        let empty_table = 0u32.to_be_bytes();
        let stbl = [
            full_box(b"stsd", 0, 0, &stsd.0),
            full_box(b"stts", 0, 0, &empty_table),
            full_box(b"stsc", 0, 0, &empty_table),
            full_box(b"stsz", 0, 0, &[0; 8]),
            full_box(b"stco", 0, 0, &empty_table),
        ]
        .concat();

        let minf = [
            full_box(b"vmhd", 0, 1, &vmhd.0),
            plain_box(b"dinf", &full_box(b"dref", 0, 0, &dref.0)),
            plain_box(b"stbl", &stbl),
        ]
        .concat();

        let mdia = [
            full_box(b"mdhd", 0, 0, &mdhd.0),
            full_box(b"hdlr", 0, 0, &hdlr.0),
            plain_box(b"minf", &minf),
        ]
        .concat();

        let trak = [full_box(b"tkhd", 0, 3, &tkhd.0), plain_box(b"mdia", &mdia)].concat();

        let mut trex = Buf::default();
        trex.u32(TRACK_ID).u32(1).u32(0).u32(0).u32(0);

        plain_box(
            b"moov",
            &[
                full_box(b"mvhd", 0, 0, &mvhd.0),
                plain_box(b"trak", &trak),
                plain_box(b"mvex", &full_box(b"trex", 0, 0, &trex.0)),
            ]
            .concat(),
        )
    }

    fn moof(
        &self,
        decode_time: u64,
        duration: u32,
        size: u32,
        keyframe: bool,
        data_offset: u32,
    ) -> Vec<u8> {
        let mut mfhd = Buf::default();
        mfhd.u32(self.sequence);

        let mut tfhd = Buf::default();
        tfhd.u32(TRACK_ID);

        let mut tfdt = Buf::default();
        tfdt.u64(decode_time);

        let mut trun = Buf::default();
        trun.u32(1).u32(data_offset).u32(duration).u32(size);
        trun.u32(if keyframe {
            SAMPLE_FLAGS_SYNC
        } else {
            SAMPLE_FLAGS_NON_SYNC
        });
        let trun_flags =
            TRUN_DATA_OFFSET | TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE | TRUN_SAMPLE_FLAGS;

        let traf = [
            full_box(b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF, &tfhd.0),
            full_box(b"tfdt", 1, 0, &tfdt.0),
            full_box(b"trun", 0, trun_flags, &trun.0),
        ]
        .concat();

        plain_box(
            b"moof",
            &[full_box(b"mfhd", 0, 0, &mfhd.0), plain_box(b"traf", &traf)].concat(),
        )
    }
}

impl<W: Write + Send + 'static> Muxer for Mp4Muxer<W> {
    fn write_header(&mut self, config: &MediaPacket) -> Result<(), RecordError> {
        let avc = AvcConfig::parse(&config.data)?;

        let mut ftyp = Buf::default();
        ftyp.bytes(b"isom").u32(0x200);
        for brand in [b"isom", b"iso6", b"avc1", b"mp41"] {
            ftyp.bytes(brand);
        }

        self.out.write_all(&plain_box(b"ftyp", &ftyp.0))?;
        self.out.write_all(&self.moov(&avc))?;
        Ok(())
    }

    fn write_packet(&mut self, packet: &RecordPacket) -> Result<(), RecordError> {
        let origin = *self.origin.get_or_insert(packet.pts());
        let decode_time = packet.pts().saturating_sub(origin);
        let keyframe = avc::is_keyframe(packet.data());
        let sample = avc::to_length_prefixed(packet.data());
        let size = clamp_u32(sample.len() as u64);
        let duration = clamp_u32(packet.duration);

        self.sequence = self.sequence.wrapping_add(1);
        // the moof size does not depend on the offset value
        let moof_len = self.moof(decode_time, duration, size, keyframe, 0).len();
        let data_offset = clamp_u32(moof_len as u64 + 8);
        let moof = self.moof(decode_time, duration, size, keyframe, data_offset);

        self.out.write_all(&moof)?;
        self.out.write_all(&plain_box(b"mdat", &sample))?;
        trace!(seq = self.sequence, decode_time, duration, keyframe, "wrote fragment");
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), RecordError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Big-endian byte builder.
#[derive(Default)]
struct Buf(Vec<u8>);

impl Buf {
    fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.0.extend_from_slice(b);
        self
    }

    fn zeros(&mut self, n: usize) -> &mut Self {
        self.0.resize(self.0.len() + n, 0);
        self
    }

    fn matrix(&mut self) -> &mut Self {
        for v in UNITY_MATRIX {
            self.u32(v);
        }
        self
    }
}

fn plain_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&clamp_u32(payload.len() as u64 + 8).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 4);
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    plain_box(kind, &body)
}
