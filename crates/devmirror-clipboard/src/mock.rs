//! Mock clipboard backend for testing.

use std::sync::{Arc, Mutex};

use crate::error::ClipboardError;
use crate::ClipboardProvider;

#[derive(Debug, Default)]
struct MockClipboardState {
    text: Option<String>,
    get_calls: usize,
    set_calls: usize,
}

/// In-memory clipboard that records how it was used.
#[derive(Default)]
pub struct MockClipboard {
    state: Arc<Mutex<MockClipboardState>>,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock clipboard that already holds `text`.
    pub fn with_text(text: &str) -> Self {
        let clipboard = Self::new();
        clipboard.state.lock().unwrap().text = Some(text.to_string());
        clipboard
    }

    /// Get a clonable handle for observing the clipboard from tests.
    pub fn handle(&self) -> MockClipboardHandle {
        MockClipboardHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for `MockClipboard`.
#[derive(Clone)]
pub struct MockClipboardHandle {
    state: Arc<Mutex<MockClipboardState>>,
}

impl MockClipboardHandle {
    pub fn text(&self) -> Option<String> {
        self.state.lock().unwrap().text.clone()
    }

    /// Number of `set_text` calls so far.
    pub fn set_calls(&self) -> usize {
        self.state.lock().unwrap().set_calls
    }

    /// Number of `get_text` calls so far.
    pub fn get_calls(&self) -> usize {
        self.state.lock().unwrap().get_calls
    }
}

impl ClipboardProvider for MockClipboard {
    fn get_text(&mut self) -> Result<Option<String>, ClipboardError> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        Ok(state.text.clone())
    }

    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut state = self.state.lock().unwrap();
        state.set_calls += 1;
        state.text = Some(text.to_string());
        Ok(())
    }
}
