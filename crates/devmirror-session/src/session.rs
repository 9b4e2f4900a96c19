//! Device session: tunnel, companion, the two sockets and the handshake.

use std::io::Read;
use std::net::{Ipv4Addr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use devmirror_bridge::{Bridge, Companion};
use devmirror_protocol::read_device_info;
use devmirror_types::{DeviceInfo, PortRange, TunnelMode};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SessionError;
use crate::socket::{ListenerSlot, StreamSlot};
use crate::state::SessionState;
use crate::tunnel::{Tunnel, TunnelOptions};

/// Parameters for [`DeviceSession::establish`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub socket_name: String,
    pub port_range: PortRange,
    pub force_forward: bool,
    /// Forward mode: connection attempts for the video socket.
    pub connect_attempts: u32,
    /// Forward mode: pause between connection attempts.
    pub connect_delay: Duration,
    /// Grace period for the companion to exit on stop before it is killed.
    pub watchdog_timeout: Duration,
    /// Companion command; empty if the companion is started elsewhere.
    pub companion_args: Vec<String>,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_name: config.tunnel.socket_name.clone(),
            port_range: config.tunnel.port_range,
            force_forward: config.tunnel.force_forward,
            connect_attempts: config.tunnel.connect_attempts,
            connect_delay: config.tunnel.connect_delay(),
            watchdog_timeout: config.session.watchdog_timeout(),
            companion_args: config.bridge.companion_command.clone(),
        }
    }

    fn tunnel(&self) -> TunnelOptions {
        TunnelOptions {
            socket_name: self.socket_name.clone(),
            port_range: self.port_range,
            force_forward: self.force_forward,
        }
    }
}

/// What a call to [`DeviceSession::stop`] actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    pub listener_closed: bool,
    pub video_closed: bool,
    pub control_closed: bool,
    pub tunnel_disabled: bool,
    pub companion_killed: bool,
}

/// Set by the watchdog once the companion has exited.
type Terminated = Arc<(Mutex<bool>, Condvar)>;

/// An established connection to the device.
pub struct DeviceSession {
    tunnel: Tunnel,
    listener: Arc<ListenerSlot>,
    video: StreamSlot,
    control: StreamSlot,
    companion: Option<Arc<dyn Companion>>,
    terminated: Terminated,
    watchdog: Option<JoinHandle<()>>,
    watchdog_timeout: Duration,
    device: Option<DeviceInfo>,
    state: SessionState,
}

impl DeviceSession {
    /// Bring the tunnel up, start the companion, open both sockets and read
    /// the handshake.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn establish(
        bridge: Arc<dyn Bridge>,
        options: &SessionOptions,
    ) -> Result<Self, SessionError> {
        let tunnel = Tunnel::establish(bridge.clone(), &options.tunnel()).map_err(|e| {
            error!(error = %e, state = %SessionState::Establishing, "session establishment failed");
            e
        })?;
        let mut session = Self {
            tunnel,
            listener: Arc::new(ListenerSlot::default()),
            video: StreamSlot::default(),
            control: StreamSlot::default(),
            companion: None,
            terminated: Arc::new((Mutex::new(false), Condvar::new())),
            watchdog: None,
            watchdog_timeout: options.watchdog_timeout,
            device: None,
            state: SessionState::TunnelUp,
        };
        if let Some(listener) = session.tunnel.take_listener() {
            session.listener = Arc::new(listener);
        }

        match session.connect(bridge.as_ref(), options) {
            Ok(device) => {
                info!(%device, mode = %session.tunnel.mode(), "device session established");
                session.device = Some(device);
                session.state = SessionState::Active;
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, state = %session.state, "session establishment failed");
                session.stop();
                session.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn connect(
        &mut self,
        bridge: &dyn Bridge,
        options: &SessionOptions,
    ) -> Result<DeviceInfo, SessionError> {
        if !options.companion_args.is_empty() {
            let companion: Arc<dyn Companion> =
                Arc::from(bridge.start_companion(&options.companion_args)?);
            // stored first so stop() can kill it even if the watchdog fails
            self.companion = Some(companion.clone());
            self.watchdog = Some(spawn_watchdog(
                companion,
                self.terminated.clone(),
                self.listener.clone(),
            )?);
        }

        let connected = match self.tunnel.mode() {
            TunnelMode::Reverse => self.accept_both(),
            TunnelMode::Forward => connect_both(self.tunnel.port(), options),
        };
        // the bridge route is no longer needed once the sockets exist, or
        // once it is clear they never will
        self.tunnel.disable();
        let (video, control) = connected?;

        self.video = StreamSlot::new(video);
        self.control = StreamSlot::new(control);
        self.state = SessionState::Connected;

        let mut reader = self.video.try_clone()?;
        read_device_info(&mut reader).map_err(SessionError::Handshake)
    }

    /// Reverse mode: the first connection is video, the second control.
    fn accept_both(&self) -> Result<(TcpStream, TcpStream), SessionError> {
        let accept = |what: &str| {
            self.listener
                .accept()
                .map_err(|e| SessionError::Connect(format!("accepting {what} socket: {e}")))
        };
        let video = accept("video")?;
        let control = accept("control")?;
        if self.listener.close() {
            debug!("listener closed after accepting both sockets");
        }
        Ok((video, control))
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tunnel_mode(&self) -> TunnelMode {
        self.tunnel.mode()
    }

    pub fn port(&self) -> u16 {
        self.tunnel.port()
    }

    /// A handle for reading the video stream.
    pub fn video_stream(&self) -> Result<TcpStream, SessionError> {
        Ok(self.video.try_clone()?)
    }

    /// A handle for reading or writing the control socket.
    pub fn control_stream(&self) -> Result<TcpStream, SessionError> {
        Ok(self.control.try_clone()?)
    }

    /// Tear the session down. Safe to call any number of times: each socket
    /// is closed once, the tunnel removed once, the companion killed once.
    pub fn stop(&mut self) -> StopReport {
        let mut report = StopReport {
            listener_closed: self.listener.close(),
            video_closed: self.video.close(),
            control_closed: self.control.close(),
            ..StopReport::default()
        };

        if self.tunnel.is_enabled() {
            self.tunnel.disable();
            report.tunnel_disabled = true;
        }

        let mut companion_gone = true;
        if let Some(companion) = self.companion.take() {
            if !wait_terminated(&self.terminated, self.watchdog_timeout) {
                warn!("companion did not exit in time, killing it");
                match companion.kill() {
                    Ok(()) => report.companion_killed = true,
                    Err(e) => {
                        error!(error = %e, "could not kill companion");
                        companion_gone = false;
                    }
                }
            }
        }
        if let Some(watchdog) = self.watchdog.take() {
            if !companion_gone {
                // still waiting on a live process; leave it detached
                warn!("detaching watchdog thread");
            } else if watchdog.join().is_err() {
                warn!("watchdog thread panicked");
            }
        }

        if !self.state.is_terminal() {
            self.state = SessionState::Stopped;
        }
        debug!(?report, "session stopped");
        report
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward mode: retry the video connection until the device side answers,
/// then open the control connection once.
fn connect_both(
    port: u16,
    options: &SessionOptions,
) -> Result<(TcpStream, TcpStream), SessionError> {
    let video = connect_with_retry(port, options.connect_attempts, options.connect_delay)?;
    let control = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        .map_err(|e| SessionError::Connect(format!("control socket: {e}")))?;
    Ok((video, control))
}

fn connect_with_retry(
    port: u16,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream, SessionError> {
    for attempt in 1..=attempts {
        match connect_and_probe(port) {
            Ok(stream) => {
                debug!(port, attempt, "video socket connected");
                return Ok(stream);
            }
            Err(e) => debug!(port, attempt, error = %e, "device not ready"),
        }
        if attempt < attempts {
            std::thread::sleep(delay);
        }
    }
    Err(SessionError::Connect(format!(
        "device did not answer on port {port} after {attempts} attempts"
    )))
}

/// The bridge accepts the TCP connection even when nothing listens on the
/// device yet; only a byte from the device proves the path is live.
fn connect_and_probe(port: u16) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    let mut probe = [0u8; 1];
    stream.read_exact(&mut probe)?;
    Ok(stream)
}

fn spawn_watchdog(
    companion: Arc<dyn Companion>,
    terminated: Terminated,
    listener: Arc<ListenerSlot>,
) -> Result<JoinHandle<()>, SessionError> {
    let handle = std::thread::Builder::new()
        .name("watchdog".into())
        .spawn(move || {
            if let Err(e) = companion.wait() {
                warn!(error = %e, "could not wait for companion");
            }
            debug!("companion terminated");
            let (lock, cond) = &*terminated;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
            cond.notify_all();
            // unblock a pending accept
            if listener.close() {
                debug!("listener closed by watchdog");
            }
        })?;
    Ok(handle)
}

/// Wait up to `timeout` for the watchdog to report termination.
fn wait_terminated(terminated: &Terminated, timeout: Duration) -> bool {
    let (lock, cond) = &**terminated;
    let deadline = Instant::now() + timeout;
    let mut done = lock.lock().unwrap_or_else(PoisonError::into_inner);
    while !*done {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        done = cond
            .wait_timeout(done, remaining)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
    *done
}
