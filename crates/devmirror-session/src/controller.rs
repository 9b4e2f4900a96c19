//! Control message channel.
//!
//! Any thread may push [`ControlMessage`]s; one writer thread serialises
//! them onto the control socket in push order.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use devmirror_protocol::encode_control_message;
use devmirror_types::ControlMessage;
use tracing::{debug, error, trace, warn};

use crate::error::SessionError;

/// Interval between checks in [`Controller::wait_finished`].
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Queue {
    messages: VecDeque<ControlMessage>,
    stopped: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clonable producer side of a [`Controller`].
#[derive(Clone)]
pub struct ControlSender {
    shared: Arc<Shared>,
}

impl ControlSender {
    /// Queue a message without blocking.
    ///
    /// Returns `false`, dropping the message, once the channel has stopped.
    pub fn push(&self, msg: ControlMessage) -> bool {
        let mut queue = self.shared.lock();
        if queue.stopped {
            warn!(msg = msg.name(), "control channel stopped, message dropped");
            return false;
        }
        queue.messages.push_back(msg);
        self.shared.cond.notify_one();
        true
    }
}

/// Owner of the writer thread.
pub struct Controller {
    shared: Arc<Shared>,
    writer: Option<JoinHandle<Result<u64, SessionError>>>,
}

impl Controller {
    pub fn start<W: Write + Send + 'static>(writer: W) -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let writer_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("controller".into())
            .spawn(move || {
                let result = write_loop(&writer_shared, writer);
                if let Err(e) = &result {
                    error!(error = %e, "control writer stopped");
                    // nothing queued now or later will be written
                    let mut queue = writer_shared.lock();
                    queue.stopped = true;
                    queue.messages.clear();
                }
                result
            })?;
        Ok(Self {
            shared,
            writer: Some(handle),
        })
    }

    pub fn sender(&self) -> ControlSender {
        ControlSender {
            shared: self.shared.clone(),
        }
    }

    pub fn push(&self, msg: ControlMessage) -> bool {
        self.sender().push(msg)
    }

    /// Reject further pushes. The writer keeps going until the queue is
    /// empty, then exits.
    pub fn request_stop(&self) {
        let mut queue = self.shared.lock();
        queue.stopped = true;
        self.shared.cond.notify_all();
    }

    /// Wait up to `timeout` for the writer to exit. Returns `false` if it is
    /// still running, e.g. blocked on a peer that stopped reading.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let Some(writer) = &self.writer else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !writer.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(FINISH_POLL_INTERVAL);
        }
        true
    }

    /// Join the writer. Returns the number of messages written; later calls
    /// return 0.
    ///
    /// Blocks for as long as the writer does: call [`request_stop`] first,
    /// and close the socket if the writer may be stuck in a write.
    ///
    /// [`request_stop`]: Self::request_stop
    pub fn join(&mut self) -> Result<u64, SessionError> {
        let Some(writer) = self.writer.take() else {
            return Ok(0);
        };
        writer
            .join()
            .map_err(|_| SessionError::Other(anyhow::anyhow!("control writer panicked")))?
    }

    /// Reject further pushes, write what is already queued, and join the
    /// writer.
    pub fn stop(&mut self) -> Result<u64, SessionError> {
        self.request_stop();
        self.join()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!(error = %e, "controller stopped on drop");
        }
    }
}

fn write_loop<W: Write>(shared: &Shared, mut writer: W) -> Result<u64, SessionError> {
    let mut written = 0;
    loop {
        let next = {
            let mut queue = shared.lock();
            while !queue.stopped && queue.messages.is_empty() {
                queue = shared
                    .cond
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            queue.messages.pop_front()
        };
        let Some(msg) = next else {
            debug!(written, "control channel drained");
            return Ok(written);
        };
        let bytes = encode_control_message(&msg);
        writer.write_all(&bytes)?;
        writer.flush()?;
        written += 1;
        trace!(msg = msg.name(), len = bytes.len(), "sent control message");
    }
}
