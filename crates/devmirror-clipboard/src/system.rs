//! System clipboard backend built on `arboard`.

use anyhow::anyhow;
use tracing::debug;

use crate::error::ClipboardError;
use crate::ClipboardProvider;

/// The desktop clipboard.
///
/// The underlying handle is opened on first use and then kept alive: on X11
/// the content we set is only served while the handle exists.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> Result<&mut arboard::Clipboard, ClipboardError> {
        if self.inner.is_none() {
            let clipboard = arboard::Clipboard::new().map_err(map_error)?;
            debug!("opened system clipboard");
            self.inner = Some(clipboard);
        }
        self.inner.as_mut().ok_or(ClipboardError::Unavailable)
    }
}

impl ClipboardProvider for SystemClipboard {
    fn get_text(&mut self) -> Result<Option<String>, ClipboardError> {
        match self.handle()?.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(map_error(e)),
        }
    }

    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.handle()?.set_text(text).map_err(map_error)
    }
}

fn map_error(e: arboard::Error) -> ClipboardError {
    match e {
        arboard::Error::ClipboardNotSupported => ClipboardError::Unavailable,
        arboard::Error::ClipboardOccupied => ClipboardError::Occupied,
        other => ClipboardError::Other(anyhow!(other.to_string())),
    }
}
