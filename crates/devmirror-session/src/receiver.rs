//! Device message receiver.
//!
//! Reads the control socket into a fixed buffer sized for the largest
//! possible message, decodes every complete message at the front, and
//! shifts the unconsumed tail back to the start.

use std::io::{self, Read};
use std::thread::JoinHandle;

use devmirror_clipboard::{adopt_device_text, ClipboardProvider};
use devmirror_protocol::{decode_device_message, ProtocolError, DEVICE_MSG_MAX_SIZE};
use devmirror_types::DeviceMessage;
use tracing::{debug, error, warn};

use crate::error::SessionError;

/// Reassembles and dispatches device messages from one reader.
pub struct Receiver<R, C> {
    reader: R,
    clipboard: C,
    buf: Box<[u8]>,
    /// Bytes of `buf` holding unconsumed data.
    filled: usize,
    dispatched: u64,
}

impl<R, C> Receiver<R, C>
where
    R: Read + Send + 'static,
    C: ClipboardProvider,
{
    pub fn new(reader: R, clipboard: C) -> Self {
        Self {
            reader,
            clipboard,
            buf: vec![0u8; DEVICE_MSG_MAX_SIZE].into_boxed_slice(),
            filled: 0,
            dispatched: 0,
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(mut self) -> io::Result<JoinHandle<Result<u64, SessionError>>> {
        std::thread::Builder::new()
            .name("receiver".into())
            .spawn(move || {
                let result = self.run();
                match &result {
                    Ok(count) => debug!(count, "receiver finished"),
                    Err(e) => error!(error = %e, "receiver stopped"),
                }
                result
            })
    }

    /// Read and dispatch until the peer closes the stream.
    ///
    /// Returns the number of messages dispatched. A corrupted stream ends the
    /// loop with an error; there is no resynchronisation.
    pub fn run(&mut self) -> Result<u64, SessionError> {
        loop {
            if self.filled == self.buf.len() {
                // cannot happen while decode bounds messages by the buffer size
                return Err(ProtocolError::TooLarge {
                    size: self.filled,
                    max: DEVICE_MSG_MAX_SIZE,
                }
                .into());
            }
            let n = match self.reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    debug!("device closed the control socket");
                    return Ok(self.dispatched);
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                    debug!(error = %e, "control socket closed locally");
                    return Ok(self.dispatched);
                }
                Err(e) => return Err(e.into()),
            };
            self.filled += n;
            self.process()?;
        }
    }

    /// Decode and dispatch every complete message, then compact.
    fn process(&mut self) -> Result<(), ProtocolError> {
        let mut head = 0;
        while let Some((msg, consumed)) = decode_device_message(&self.buf[head..self.filled])? {
            self.dispatch(msg);
            head += consumed;
        }
        if head > 0 {
            self.buf.copy_within(head..self.filled, 0);
            self.filled -= head;
        }
        Ok(())
    }

    fn dispatch(&mut self, msg: DeviceMessage) {
        self.dispatched += 1;
        match msg {
            DeviceMessage::Clipboard { text } => {
                if let Err(e) = adopt_device_text(&mut self.clipboard, &text) {
                    warn!(error = %e, "could not set clipboard");
                }
            }
        }
    }
}
