//! Threaded record pipeline.
//!
//! Producers push [`MediaPacket`]s through a [`RecordSink`]; a single
//! consumer thread writes them to a [`Muxer`]. A frame's duration is only
//! known once its successor arrives, so the consumer holds back exactly one
//! pending frame.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use devmirror_types::{MediaPacket, Size};
use tracing::{debug, error, info, warn};

use crate::error::RecordError;
use crate::muxer::{open_file_muxer, Muxer, RecordFormat};
use crate::packet::RecordPacket;

/// Duration given to the last frame, which has no successor.
pub const FALLBACK_DURATION_US: u64 = 100_000;

/// Lifecycle of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Waiting for the configuration packet.
    NoHeaderYet,
    /// Header written, frames flowing.
    Writing,
    /// Stop requested; queued packets are still being written.
    Draining,
    /// Trailer written, file complete.
    Finalized,
    /// A write failed or nothing was recorded.
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordOptions {
    /// Duration in microseconds given to the final frame.
    pub fallback_duration_us: u64,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            fallback_duration_us: FALLBACK_DURATION_US,
        }
    }
}

/// Result of a clean recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSummary {
    pub frames: u64,
}

struct Queue {
    packets: VecDeque<MediaPacket>,
    stopped: bool,
    state: RecorderState,
}

struct Shared {
    queue: Mutex<Queue>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Clonable producer side of a [`Recorder`].
#[derive(Clone)]
pub struct RecordSink {
    shared: Arc<Shared>,
}

impl RecordSink {
    /// Queue a packet for writing.
    ///
    /// Fails once the recording has failed or been stopped, so the producer
    /// can stop feeding it.
    pub fn push(&self, packet: MediaPacket) -> Result<(), RecordError> {
        let mut queue = self.shared.lock();
        if queue.state == RecorderState::Failed {
            return Err(RecordError::Failed);
        }
        if queue.stopped {
            return Err(RecordError::Stopped);
        }
        queue.packets.push_back(packet);
        self.shared.cond.notify_one();
        Ok(())
    }
}

/// Owner of the consumer thread.
pub struct Recorder {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Result<RecordSummary, RecordError>>>,
}

impl Recorder {
    /// Create the output file and start recording into it.
    pub fn create(
        path: &Path,
        format: RecordFormat,
        frame_size: Size,
        options: RecordOptions,
    ) -> Result<Self, RecordError> {
        let muxer = open_file_muxer(format, path, frame_size)?;
        let target = format!("{format} file: {}", path.display());
        Self::start(muxer, target, options)
    }

    /// Start the consumer thread over an already opened muxer.
    ///
    /// `target` names the output in the completion log line.
    pub fn start(
        muxer: Box<dyn Muxer>,
        target: String,
        options: RecordOptions,
    ) -> Result<Self, RecordError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                packets: VecDeque::new(),
                stopped: false,
                state: RecorderState::NoHeaderYet,
            }),
            cond: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("recorder".into())
            .spawn(move || {
                let mut consumer = Consumer {
                    shared: worker_shared,
                    muxer,
                    options,
                    header_written: false,
                    pending: None,
                    frames: 0,
                };
                let result = consumer.run();
                match &result {
                    Ok(_) => info!("Recording complete to {target}"),
                    Err(e) => error!(error = %e, "Recording failed to {target}"),
                }
                result
            })?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Producer handle for this recording.
    pub fn sink(&self) -> RecordSink {
        RecordSink {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.shared.lock().state
    }

    /// Stop accepting packets, drain what is queued and finish the file.
    ///
    /// Only the first call reports the outcome; later calls return
    /// [`RecordError::Stopped`].
    pub fn stop(&mut self) -> Result<RecordSummary, RecordError> {
        {
            let mut queue = self.shared.lock();
            queue.stopped = true;
            if queue.state == RecorderState::Writing {
                queue.state = RecorderState::Draining;
            }
            self.shared.cond.notify_all();
        }
        let worker = self.worker.take().ok_or(RecordError::Stopped)?;
        worker
            .join()
            .map_err(|_| RecordError::Other(anyhow::anyhow!("recorder thread panicked")))?
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                debug!(error = %e, "recorder stopped on drop");
            }
        }
    }
}

struct Consumer {
    shared: Arc<Shared>,
    muxer: Box<dyn Muxer>,
    options: RecordOptions,
    header_written: bool,
    /// Last frame, written once the next one gives it a duration.
    pending: Option<MediaPacket>,
    frames: u64,
}

impl Consumer {
    fn run(&mut self) -> Result<RecordSummary, RecordError> {
        if let Err(e) = self.write_all() {
            self.fail();
            return Err(e);
        }
        if !self.header_written {
            self.fail();
            return Err(RecordError::Empty);
        }
        if let Err(e) = self.muxer.write_trailer() {
            self.fail();
            return Err(e);
        }
        self.shared.lock().state = RecorderState::Finalized;
        Ok(RecordSummary {
            frames: self.frames,
        })
    }

    /// Consume packets until stopped and drained.
    fn write_all(&mut self) -> Result<(), RecordError> {
        loop {
            let next = {
                let mut queue = self.shared.lock();
                while !queue.stopped && queue.packets.is_empty() {
                    queue = self
                        .shared
                        .cond
                        .wait(queue)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                queue.packets.pop_front()
            };
            let Some(packet) = next else {
                // stopped and drained
                return self.flush_pending();
            };
            self.handle(packet)?;
        }
    }

    fn handle(&mut self, packet: MediaPacket) -> Result<(), RecordError> {
        if !self.header_written {
            if !packet.is_config() {
                return Err(RecordError::MissingConfig);
            }
            self.muxer.write_header(&packet)?;
            self.header_written = true;
            let mut queue = self.shared.lock();
            if queue.state == RecorderState::NoHeaderYet {
                queue.state = if queue.stopped {
                    RecorderState::Draining
                } else {
                    RecorderState::Writing
                };
            }
            debug!("wrote record header");
            return Ok(());
        }

        let Some(pts) = packet.pts else {
            debug!("ignoring mid-stream configuration packet");
            return Ok(());
        };

        if let Some(previous) = self.pending.take() {
            let previous_pts = previous.pts.unwrap_or(0);
            if pts < previous_pts {
                warn!(pts, previous_pts, "non-monotonic timestamp");
            }
            let duration = pts.saturating_sub(previous_pts);
            self.write_frame(previous, duration)?;
        }
        self.pending = Some(packet);
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<(), RecordError> {
        if let Some(last) = self.pending.take() {
            self.write_frame(last, self.options.fallback_duration_us)?;
        }
        Ok(())
    }

    fn write_frame(&mut self, packet: MediaPacket, duration: u64) -> Result<(), RecordError> {
        self.muxer.write_packet(&RecordPacket::new(packet, duration))?;
        self.frames += 1;
        Ok(())
    }

    /// Mark the recording failed and drop everything still queued.
    fn fail(&mut self) {
        self.pending = None;
        let mut queue = self.shared.lock();
        queue.state = RecorderState::Failed;
        let dropped = queue.packets.len();
        queue.packets.clear();
        if dropped > 0 {
            warn!(dropped, "discarded queued packets after record failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Written {
        Header,
        Frame { pts: u64, duration: u64 },
        Trailer,
    }

    #[derive(Default)]
    struct Log {
        written: Vec<Written>,
        fail_on_frame: Option<usize>,
        frames: usize,
    }

    struct LogMuxer(Arc<Mutex<Log>>);

    impl Muxer for LogMuxer {
        fn write_header(&mut self, _config: &MediaPacket) -> Result<(), RecordError> {
            self.0.lock().unwrap().written.push(Written::Header);
            Ok(())
        }

        fn write_packet(&mut self, packet: &RecordPacket) -> Result<(), RecordError> {
            let mut log = self.0.lock().unwrap();
            log.frames += 1;
            if log.fail_on_frame == Some(log.frames) {
                return Err(RecordError::Io(std::io::Error::other("disk full")));
            }
            log.written.push(Written::Frame {
                pts: packet.pts(),
                duration: packet.duration,
            });
            Ok(())
        }

        fn write_trailer(&mut self) -> Result<(), RecordError> {
            self.0.lock().unwrap().written.push(Written::Trailer);
            Ok(())
        }
    }

    fn recorder(log: &Arc<Mutex<Log>>) -> Recorder {
        Recorder::start(
            Box::new(LogMuxer(log.clone())),
            "test".into(),
            RecordOptions::default(),
        )
        .unwrap()
    }

    fn frame(pts: u64) -> MediaPacket {
        MediaPacket::frame(pts, vec![0u8; 4])
    }

    fn config() -> MediaPacket {
        MediaPacket::config(vec![1u8; 4])
    }

    #[test]
    fn durations_come_from_the_next_timestamp() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = recorder(&log);
        let sink = rec.sink();
        for packet in [config(), frame(10), frame(20), frame(35)] {
            sink.push(packet).unwrap();
        }
        let summary = rec.stop().unwrap();
        assert_eq!(summary.frames, 3);

        let written = log.lock().unwrap().written.clone();
        assert_eq!(
            written,
            vec![
                Written::Header,
                Written::Frame {
                    pts: 10,
                    duration: 10
                },
                Written::Frame {
                    pts: 20,
                    duration: 15
                },
                Written::Frame {
                    pts: 35,
                    duration: FALLBACK_DURATION_US
                },
                Written::Trailer,
            ]
        );
        assert_eq!(rec.state(), RecorderState::Finalized);
    }

    #[test]
    fn pending_frame_is_flushed_on_stop() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = recorder(&log);
        let sink = rec.sink();
        for packet in [config(), frame(10), frame(20), frame(35), frame(50)] {
            sink.push(packet).unwrap();
        }
        rec.stop().unwrap();

        let frames: Vec<_> = log
            .lock()
            .unwrap()
            .written
            .iter()
            .filter_map(|w| match w {
                Written::Frame { pts, duration } => Some((*pts, *duration)),
                _ => None,
            })
            .collect();
        assert_eq!(
            frames,
            vec![(10, 10), (20, 15), (35, 15), (50, FALLBACK_DURATION_US)]
        );
    }

    #[test]
    fn mid_stream_config_is_skipped() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = recorder(&log);
        let sink = rec.sink();
        for packet in [config(), frame(0), config(), frame(40)] {
            sink.push(packet).unwrap();
        }
        rec.stop().unwrap();
        let written = log.lock().unwrap().written.clone();
        assert_eq!(
            written[1],
            Written::Frame {
                pts: 0,
                duration: 40
            }
        );
        assert_eq!(written.len(), 4);
    }

    #[test]
    fn fallback_duration_is_configurable() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = Recorder::start(
            Box::new(LogMuxer(log.clone())),
            "test".into(),
            RecordOptions {
                fallback_duration_us: 7,
            },
        )
        .unwrap();
        rec.sink().push(config()).unwrap();
        rec.sink().push(frame(3)).unwrap();
        rec.stop().unwrap();
        assert!(log.lock().unwrap().written.contains(&Written::Frame {
            pts: 3,
            duration: 7
        }));
    }

    #[test]
    fn first_packet_must_be_config() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = recorder(&log);
        rec.sink().push(frame(1)).unwrap();
        assert!(matches!(rec.stop(), Err(RecordError::MissingConfig)));
        assert_eq!(rec.state(), RecorderState::Failed);
        assert!(log.lock().unwrap().written.is_empty());
    }

    #[test]
    fn empty_recording_is_a_failure() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = recorder(&log);
        assert!(matches!(rec.stop(), Err(RecordError::Empty)));
        assert!(log.lock().unwrap().written.is_empty());
    }

    #[test]
    fn write_failure_skips_trailer_and_rejects_pushes() {
        let log = Arc::new(Mutex::new(Log {
            fail_on_frame: Some(1),
            ..Log::default()
        }));
        let mut rec = recorder(&log);
        let sink = rec.sink();
        sink.push(config()).unwrap();
        sink.push(frame(0)).unwrap();
        sink.push(frame(10)).unwrap();

        // wait until the consumer has hit the failure
        for _ in 0..200 {
            if rec.state() == RecorderState::Failed {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(rec.state(), RecorderState::Failed);
        assert!(matches!(sink.push(frame(20)), Err(RecordError::Failed)));

        assert!(matches!(rec.stop(), Err(RecordError::Io(_))));
        let written = log.lock().unwrap().written.clone();
        assert_eq!(written, vec![Written::Header]);
    }

    #[test]
    fn push_after_stop_is_rejected() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut rec = recorder(&log);
        let sink = rec.sink();
        sink.push(config()).unwrap();
        assert_eq!(rec.stop().unwrap().frames, 0);
        assert!(sink.push(frame(1)).is_err());
        assert!(matches!(rec.stop(), Err(RecordError::Stopped)));
    }
}
