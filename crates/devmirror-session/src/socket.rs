//! Sockets that are closed exactly once, by whichever thread gets there first.
//!
//! The companion watchdog and the stop path both try to close the reverse
//! listener; an atomic swap decides which one does it.

use std::io;
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

/// Interval between accept attempts on the non-blocking listener.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Loopback listener that can be closed from another thread while a
/// caller is blocked in [`ListenerSlot::accept`].
#[derive(Default)]
pub struct ListenerSlot {
    closed: AtomicBool,
    listener: Mutex<Option<TcpListener>>,
}

impl ListenerSlot {
    /// Listen on `127.0.0.1:port`.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            closed: AtomicBool::new(false),
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Wait for the next inbound connection.
    ///
    /// Fails with `ConnectionAborted` once the listener has been closed.
    pub fn accept(&self) -> io::Result<TcpStream> {
        loop {
            {
                let guard = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(listener) = guard.as_ref() else {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "listener closed",
                    ));
                };
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        // accepted sockets may inherit non-blocking mode
                        stream.set_nonblocking(false)?;
                        return Ok(stream);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            std::thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }

    /// Close the listener. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        listener.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A connected stream shut down at most once.
///
/// Shutting down wakes every clone blocked in a read.
#[derive(Default)]
pub struct StreamSlot {
    closed: AtomicBool,
    stream: Option<TcpStream>,
}

impl StreamSlot {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            closed: AtomicBool::new(false),
            stream: Some(stream),
        }
    }

    /// Another handle to the same socket.
    pub fn try_clone(&self) -> io::Result<TcpStream> {
        match &self.stream {
            Some(stream) if !self.closed.load(Ordering::Acquire) => stream.try_clone(),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
        }
    }

    /// Shut the socket down. Returns `true` only for the call that did it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        match &self.stream {
            Some(stream) => {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    // the peer may already be gone
                    debug!(error = %e, "socket shutdown");
                }
                true
            }
            None => false,
        }
    }
}
