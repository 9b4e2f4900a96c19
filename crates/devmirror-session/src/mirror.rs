//! Mirroring orchestration: one session, its reader threads, the control
//! channel and an optional recording.

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use devmirror_bridge::Bridge;
use devmirror_clipboard::ClipboardProvider;
use devmirror_protocol::read_packet;
use devmirror_record::{
    RecordError, RecordFormat, RecordOptions, RecordSink, RecordSummary, Recorder,
};
use devmirror_types::DeviceInfo;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::controller::{ControlSender, Controller};
use crate::error::SessionError;
use crate::receiver::Receiver;
use crate::session::{DeviceSession, SessionOptions, StopReport};

/// Reads elementary-stream packets off the video socket and hands them to
/// the recorder.
pub struct StreamReader<R> {
    reader: R,
    recorder: Option<RecordSink>,
    packets: u64,
}

impl<R: Read + Send + 'static> StreamReader<R> {
    pub fn spawn(mut self) -> io::Result<JoinHandle<Result<u64, SessionError>>> {
        std::thread::Builder::new()
            .name("stream".into())
            .spawn(move || self.run())
    }
}

impl<R: Read> StreamReader<R> {
    pub fn new(reader: R, recorder: Option<RecordSink>) -> Self {
        Self {
            reader,
            recorder,
            packets: 0,
        }
    }

    /// Read until the device ends the stream. Returns the packet count.
    pub fn run(&mut self) -> Result<u64, SessionError> {
        loop {
            let packet = match read_packet(&mut self.reader) {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    debug!(packets = self.packets, "video stream ended");
                    return Ok(self.packets);
                }
                Err(devmirror_protocol::ProtocolError::Io(e))
                    if e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    debug!(error = %e, "video socket closed");
                    return Ok(self.packets);
                }
                Err(e) => return Err(e.into()),
            };
            self.packets += 1;
            if let Some(sink) = &self.recorder {
                if let Err(e) = sink.push(packet) {
                    // recording problems never end the mirroring session
                    warn!(error = %e, "recording stopped, no longer feeding recorder");
                    self.recorder = None;
                }
            }
        }
    }
}

/// Outcome of [`Mirror::stop`].
#[derive(Debug)]
pub struct MirrorReport {
    pub session: StopReport,
    pub packets: u64,
    pub control_messages: u64,
    /// Device messages dispatched, or why the receiver ended early.
    /// `None` when clipboard sync was not enabled.
    pub receiver: Option<Result<u64, SessionError>>,
    /// `None` when recording was not enabled.
    pub recording: Option<Result<RecordSummary, RecordError>>,
}

/// Interrupts [`Mirror::wait`] from another thread.
pub struct StopHandle {
    video: TcpStream,
}

impl StopHandle {
    pub fn interrupt(&self) {
        if let Err(e) = self.video.shutdown(Shutdown::Both) {
            debug!(error = %e, "video socket already closed");
        }
    }
}

/// A running mirroring session.
pub struct Mirror {
    session: DeviceSession,
    device: DeviceInfo,
    controller: Option<Controller>,
    receiver: Option<JoinHandle<Result<u64, SessionError>>>,
    stream: Option<JoinHandle<Result<u64, SessionError>>>,
    packets: u64,
    recorder: Option<Recorder>,
    drain_timeout: Duration,
}

impl Mirror {
    /// Establish the session and start every component the config enables.
    pub fn start<C: ClipboardProvider>(
        bridge: Arc<dyn Bridge>,
        config: &Config,
        clipboard: C,
    ) -> Result<Self, SessionError> {
        let recording = record_target(config)?;
        let session = DeviceSession::establish(bridge, &SessionOptions::from_config(config))?;
        let device = session
            .device()
            .cloned()
            .ok_or_else(|| SessionError::Connect("session has no device info".into()))?;

        let recorder = match recording {
            Some((path, format)) => {
                let options = RecordOptions {
                    fallback_duration_us: config.record.fallback_duration_us,
                };
                let recorder = Recorder::create(path, format, device.frame_size, options)?;
                info!(path = %path.display(), %format, "recording");
                Some(recorder)
            }
            None => None,
        };

        let mut mirror = Self {
            session,
            device,
            controller: None,
            receiver: None,
            stream: None,
            packets: 0,
            recorder,
            drain_timeout: config.control.drain_timeout(),
        };

        let sink = mirror.recorder.as_ref().map(Recorder::sink);
        mirror.stream = Some(StreamReader::new(mirror.session.video_stream()?, sink).spawn()?);

        if config.control.enabled {
            mirror.controller = Some(Controller::start(mirror.session.control_stream()?)?);
            if config.control.clipboard_sync {
                let receiver = Receiver::new(mirror.session.control_stream()?, clipboard);
                mirror.receiver = Some(receiver.spawn()?);
            }
        }
        Ok(mirror)
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Producer handle for control messages; `None` if control is disabled.
    pub fn control(&self) -> Option<ControlSender> {
        self.controller.as_ref().map(Controller::sender)
    }

    pub fn stop_handle(&self) -> Result<StopHandle, SessionError> {
        Ok(StopHandle {
            video: self.session.video_stream()?,
        })
    }

    /// Block until the video stream ends. Returns the packets read.
    pub fn wait(&mut self) -> Result<u64, SessionError> {
        if let Some(stream) = self.stream.take() {
            self.packets = join(stream, "stream")?;
        }
        Ok(self.packets)
    }

    /// Whether the receiver is still reading device messages. Turns `false`
    /// as soon as it stops, e.g. on a corrupted stream; [`Mirror::stop`]
    /// reports why.
    pub fn receiver_running(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| !receiver.is_finished())
    }

    /// Stop every component: give the control channel a bounded time to
    /// drain, tear the session down, join the threads, then finish the
    /// recording.
    pub fn stop(mut self) -> MirrorReport {
        if let Some(controller) = &self.controller {
            controller.request_stop();
            if !controller.wait_finished(self.drain_timeout) {
                warn!("control channel did not drain in time, closing it");
            }
        }

        // unblocks every thread still reading or writing a socket
        let session = self.session.stop();

        let control_messages = match self.controller.as_mut() {
            Some(controller) => controller.join().unwrap_or_else(|e| {
                warn!(error = %e, "control channel ended with an error");
                0
            }),
            None => 0,
        };
        let receiver = self.receiver.take().map(|receiver| join(receiver, "receiver"));
        if let Some(Err(e)) = &receiver {
            error!(error = %e, "receiver ended with an error");
        }
        let packets = self.wait().unwrap_or_else(|e| {
            warn!(error = %e, "video stream ended with an error");
            self.packets
        });

        let recording = self.recorder.as_mut().map(Recorder::stop);
        info!(packets, control_messages, "mirroring stopped");
        MirrorReport {
            session,
            packets,
            control_messages,
            receiver,
            recording,
        }
    }
}

fn join(
    handle: JoinHandle<Result<u64, SessionError>>,
    name: &str,
) -> Result<u64, SessionError> {
    handle
        .join()
        .map_err(|_| SessionError::Other(anyhow::anyhow!("{name} thread panicked")))?
}

/// Output path and container, if recording is enabled.
fn record_target(config: &Config) -> Result<Option<(&Path, RecordFormat)>, SessionError> {
    let Some(path) = config.record.path.as_deref() else {
        return Ok(None);
    };
    let format = config
        .record
        .format
        .or_else(|| RecordFormat::from_path(path))
        .ok_or_else(|| {
            SessionError::Config(format!(
                "no record format specified for {} (try mkv or mp4)",
                path.display()
            ))
        })?;
    Ok(Some((path, format)))
}

#[cfg(test)]
mod tests {
    use devmirror_protocol::stream::encode_packet;
    use devmirror_types::MediaPacket;

    use super::*;

    #[test]
    fn record_format_is_inferred_from_extension() {
        let mut config = Config::default();
        assert!(record_target(&config).unwrap().is_none());

        config.record.path = Some("/tmp/out.mp4".into());
        let (_, format) = record_target(&config).unwrap().unwrap();
        assert_eq!(format, RecordFormat::Mp4);

        config.record.format = Some(RecordFormat::Matroska);
        let (_, format) = record_target(&config).unwrap().unwrap();
        assert_eq!(format, RecordFormat::Matroska);
    }

    #[test]
    fn unknown_extension_needs_explicit_format() {
        let mut config = Config::default();
        config.record.path = Some("/tmp/out.bin".into());
        assert!(matches!(
            record_target(&config),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn stream_reader_counts_packets_without_recorder() {
        let mut bytes = encode_packet(&MediaPacket::config(vec![1, 2]));
        bytes.extend(encode_packet(&MediaPacket::frame(0, vec![3])));
        bytes.extend(encode_packet(&MediaPacket::frame(10, vec![4])));
        let mut reader = StreamReader::new(&bytes[..], None);
        assert_eq!(reader.run().unwrap(), 3);
    }

    struct ResetReader;

    impl Read for ResetReader {
        fn read(&mut self, _out: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    #[test]
    fn peer_reset_is_an_error() {
        let mut reader = StreamReader::new(ResetReader, None);
        assert!(matches!(reader.run(), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bytes = encode_packet(&MediaPacket::frame(0, vec![3, 4, 5]));
        let mut reader = StreamReader::new(&bytes[..bytes.len() - 1], None);
        assert!(matches!(reader.run(), Err(SessionError::Protocol(_))));
    }
}
