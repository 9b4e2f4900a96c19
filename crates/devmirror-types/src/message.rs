//! Protocol message types.
//!
//! Control messages flow client -> device; device messages flow
//! device -> client. Both share the control socket.

use serde::{Deserialize, Serialize};

use crate::event::{KeyAction, MetaState, MotionAction, MouseButtons, ScreenPowerMode};
use crate::screen::Position;

/// Pointer id used for events generated by a mouse rather than a finger.
pub const POINTER_ID_MOUSE: u64 = u64::MAX;

/// Pointer id used for the virtual second finger (pinch-to-zoom).
pub const POINTER_ID_VIRTUAL_FINGER: u64 = u64::MAX - 1;

/// Messages sent by the client to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Inject a key event.
    InjectKeycode {
        action: KeyAction,
        /// Device keycode (`KEYCODE_*`).
        keycode: u32,
        /// Repeat count for held keys.
        repeat: u32,
        metastate: MetaState,
    },

    /// Inject a text string as if typed.
    InjectText { text: String },

    /// Inject a touch or mouse event.
    InjectTouchEvent {
        action: MotionAction,
        pointer_id: u64,
        position: Position,
        /// Normalised pressure in `0.0..=1.0`.
        pressure: f32,
        buttons: MouseButtons,
    },

    /// Inject a scroll event.
    InjectScrollEvent {
        position: Position,
        hscroll: i32,
        vscroll: i32,
    },

    /// Press BACK, or turn the screen on if it is off.
    BackOrScreenOn,

    ExpandNotificationPanel,

    ExpandSettingsPanel,

    CollapsePanels,

    /// Ask the device to send its clipboard as a [`DeviceMessage::Clipboard`].
    GetClipboard,

    /// Replace the device clipboard, optionally pasting it.
    SetClipboard { text: String, paste: bool },

    SetScreenPowerMode { mode: ScreenPowerMode },

    RotateDevice,
}

impl ControlMessage {
    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InjectKeycode { .. } => "inject-keycode",
            Self::InjectText { .. } => "inject-text",
            Self::InjectTouchEvent { .. } => "inject-touch-event",
            Self::InjectScrollEvent { .. } => "inject-scroll-event",
            Self::BackOrScreenOn => "back-or-screen-on",
            Self::ExpandNotificationPanel => "expand-notification-panel",
            Self::ExpandSettingsPanel => "expand-settings-panel",
            Self::CollapsePanels => "collapse-panels",
            Self::GetClipboard => "get-clipboard",
            Self::SetClipboard { .. } => "set-clipboard",
            Self::SetScreenPowerMode { .. } => "set-screen-power-mode",
            Self::RotateDevice => "rotate-device",
        }
    }

    /// Build a key-down/key-up pair for a single key press.
    #[must_use]
    pub fn key_press(keycode: u32) -> [Self; 2] {
        let event = |action| Self::InjectKeycode {
            action,
            keycode,
            repeat: 0,
            metastate: MetaState::NONE,
        };
        [event(KeyAction::Down), event(KeyAction::Up)]
    }
}

/// Messages sent by the device to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMessage {
    /// The device clipboard changed.
    Clipboard { text: String },
}
