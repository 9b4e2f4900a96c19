//! Record pipeline for devmirror.
//!
//! Elementary-stream packets are queued by a producer, given durations from
//! their successors' timestamps by a consumer thread, and muxed into a
//! streamable Matroska or fragmented MP4 file.

pub mod avc;
pub mod error;
pub mod muxer;
pub mod packet;
pub mod pipeline;

pub use error::RecordError;
pub use muxer::{Muxer, RecordFormat};
pub use packet::RecordPacket;
pub use pipeline::{
    RecordOptions, RecordSink, RecordSummary, Recorder, RecorderState, FALLBACK_DURATION_US,
};
