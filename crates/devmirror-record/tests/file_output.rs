//! Integration test: recordings written to real files.

use std::path::PathBuf;

use devmirror_record::{RecordError, RecordFormat, RecordOptions, Recorder};
use devmirror_types::{MediaPacket, Size};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("devmirror-{}-{name}", std::process::id()))
}

fn config_packet() -> MediaPacket {
    MediaPacket::config(vec![
        0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, // SPS
        0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, // PPS
    ])
}

fn frame(pts: u64, keyframe: bool) -> MediaPacket {
    let nal_header = if keyframe { 0x65 } else { 0x41 };
    MediaPacket::frame(pts, vec![0, 0, 0, 1, nal_header, 0x88, 0x84])
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|w| *w == needle)
        .count()
}

fn record(path: &PathBuf, format: RecordFormat) -> u64 {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut recorder =
        Recorder::create(path, format, Size::new(320, 240), RecordOptions::default()).unwrap();
    let sink = recorder.sink();
    sink.push(config_packet()).unwrap();
    sink.push(frame(0, true)).unwrap();
    sink.push(frame(33_333, false)).unwrap();
    sink.push(frame(66_666, false)).unwrap();
    recorder.stop().unwrap().frames
}

#[test]
fn matroska_file_has_one_cluster_per_frame() {
    let path = temp_path("out.mkv");
    assert_eq!(record(&path, RecordFormat::Matroska), 3);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    assert_eq!(count(&bytes, &[0x1F, 0x43, 0xB6, 0x75]), 3);
    assert_eq!(count(&bytes, b"V_MPEG4/ISO/AVC"), 1);
}

#[test]
fn mp4_file_has_one_fragment_per_frame() {
    let path = temp_path("out.mp4");
    assert_eq!(record(&path, RecordFormat::Mp4), 3);

    let bytes = std::fs::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
    assert_eq!(count(&bytes, b"moof"), 3);
    assert_eq!(count(&bytes, b"mdat"), 3);
}

#[test]
fn unusable_config_fails_the_recording() {
    let path = temp_path("bad.mkv");
    let mut recorder = Recorder::create(
        &path,
        RecordFormat::Matroska,
        Size::new(16, 16),
        RecordOptions::default(),
    )
    .unwrap();
    let sink = recorder.sink();
    sink.push(MediaPacket::config(vec![0xFF; 8])).unwrap();
    let result = recorder.stop();
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(result, Err(RecordError::InvalidConfig(_))));
}
