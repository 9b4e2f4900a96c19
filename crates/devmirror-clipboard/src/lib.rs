//! Clipboard synchronisation for devmirror.
//!
//! Defines the [`ClipboardProvider`] trait for local clipboard access and
//! [`adopt_device_text`], the policy applied when the device reports that
//! its clipboard changed.

use tracing::{debug, info};

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod system;

pub use error::ClipboardError;
pub use system::SystemClipboard;

/// Local clipboard access.
pub trait ClipboardProvider: Send + 'static {
    /// Current text on the clipboard, or `None` if it holds no text.
    fn get_text(&mut self) -> Result<Option<String>, ClipboardError>;

    /// Replace the clipboard content with `text`.
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// Make `text` the local clipboard content unless it already is.
///
/// Skipping identical text avoids a redundant set, which would otherwise be
/// observed as a local change and echoed back to the device.
///
/// Returns whether the clipboard was written.
pub fn adopt_device_text<C: ClipboardProvider + ?Sized>(
    clipboard: &mut C,
    text: &str,
) -> Result<bool, ClipboardError> {
    if clipboard.get_text()?.as_deref() == Some(text) {
        debug!("computer clipboard unchanged");
        return Ok(false);
    }
    info!(len = text.len(), "device clipboard copied");
    clipboard.set_text(text)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingClipboard {
        text: Option<String>,
        sets: usize,
    }

    impl ClipboardProvider for CountingClipboard {
        fn get_text(&mut self) -> Result<Option<String>, ClipboardError> {
            Ok(self.text.clone())
        }

        fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
            self.sets += 1;
            self.text = Some(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn identical_text_is_not_set_again() {
        let mut clipboard = CountingClipboard {
            text: Some("same".to_string()),
            sets: 0,
        };
        assert!(!adopt_device_text(&mut clipboard, "same").unwrap());
        assert_eq!(clipboard.sets, 0);
    }

    #[test]
    fn new_text_is_adopted() {
        let mut clipboard = CountingClipboard::default();
        assert!(adopt_device_text(&mut clipboard, "from device").unwrap());
        assert_eq!(clipboard.sets, 1);
        assert_eq!(clipboard.text.as_deref(), Some("from device"));

        assert!(!adopt_device_text(&mut clipboard, "from device").unwrap());
        assert_eq!(clipboard.sets, 1);
    }

    #[test]
    fn empty_clipboard_adopts_empty_text() {
        let mut clipboard = CountingClipboard::default();
        assert!(adopt_device_text(&mut clipboard, "").unwrap());
        assert_eq!(clipboard.text.as_deref(), Some(""));
    }
}
