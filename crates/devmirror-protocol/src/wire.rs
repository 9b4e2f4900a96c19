//! Wire format of the control socket.
//!
//! Both directions use the same shape:
//!   [1 byte type][type-specific payload]
//!
//! Device -> client, type 0x00 (clipboard):
//!   [4 bytes big-endian length][length bytes of UTF-8 text]
//!
//! All multi-byte integers are big-endian. There are no sync markers, so a
//! single unknown type byte desynchronises the stream for good.

use devmirror_types::{ControlMessage, DeviceMessage, Position};

use crate::error::ProtocolError;

/// Largest device message the client accepts (and its receive buffer size).
pub const DEVICE_MSG_MAX_SIZE: usize = 1 << 18;

/// Largest control message the client produces.
pub const CONTROL_MSG_MAX_SIZE: usize = 1 << 18;

/// Maximum byte length of injected text.
pub const INJECT_TEXT_MAX_LENGTH: usize = 300;

/// Maximum byte length of clipboard text sent to the device
/// (type + paste flag + 4-byte length).
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 6;

/// Device message header: type byte + 4-byte length.
const DEVICE_MSG_HEADER_SIZE: usize = 5;

/// Maximum byte length of clipboard text received from the device.
pub const DEVICE_CLIPBOARD_TEXT_MAX_LENGTH: usize = DEVICE_MSG_MAX_SIZE - DEVICE_MSG_HEADER_SIZE;

mod control_type {
    pub const INJECT_KEYCODE: u8 = 0;
    pub const INJECT_TEXT: u8 = 1;
    pub const INJECT_TOUCH_EVENT: u8 = 2;
    pub const INJECT_SCROLL_EVENT: u8 = 3;
    pub const BACK_OR_SCREEN_ON: u8 = 4;
    pub const EXPAND_NOTIFICATION_PANEL: u8 = 5;
    pub const EXPAND_SETTINGS_PANEL: u8 = 6;
    pub const COLLAPSE_PANELS: u8 = 7;
    pub const GET_CLIPBOARD: u8 = 8;
    pub const SET_CLIPBOARD: u8 = 9;
    pub const SET_SCREEN_POWER_MODE: u8 = 10;
    pub const ROTATE_DEVICE: u8 = 11;
}

mod device_type {
    pub const CLIPBOARD: u8 = 0;
}

// ── Device messages ──────────────────────────────────────────────────────────

/// Decode one device message from the start of `buf`.
///
/// Returns:
/// - `Ok(None)` if more bytes are needed (nothing is consumed),
/// - `Ok(Some((msg, n)))` with the number of bytes consumed,
/// - `Err(_)` if the stream is corrupted and must be torn down.
pub fn decode_device_message(buf: &[u8]) -> Result<Option<(DeviceMessage, usize)>, ProtocolError> {
    if buf.len() < DEVICE_MSG_HEADER_SIZE {
        // at least type + empty string length
        return Ok(None);
    }

    match buf[0] {
        device_type::CLIPBOARD => {
            let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
            if len > DEVICE_CLIPBOARD_TEXT_MAX_LENGTH {
                return Err(ProtocolError::TooLarge {
                    size: len,
                    max: DEVICE_CLIPBOARD_TEXT_MAX_LENGTH,
                });
            }
            if len > buf.len() - DEVICE_MSG_HEADER_SIZE {
                return Ok(None);
            }
            let payload = &buf[DEVICE_MSG_HEADER_SIZE..DEVICE_MSG_HEADER_SIZE + len];
            let text = decode_text(payload);
            Ok(Some((
                DeviceMessage::Clipboard { text },
                DEVICE_MSG_HEADER_SIZE + len,
            )))
        }
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

/// Encode a device message. Only loopback fakes of the device need this.
pub fn encode_device_message(msg: &DeviceMessage) -> Vec<u8> {
    match msg {
        DeviceMessage::Clipboard { text } => {
            let mut buf = Vec::with_capacity(DEVICE_MSG_HEADER_SIZE + text.len());
            buf.push(device_type::CLIPBOARD);
            write_string(&mut buf, text, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH);
            buf
        }
    }
}

/// Text is cut at the first NUL; invalid UTF-8 sequences are replaced.
fn decode_text(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

// ── Control messages ─────────────────────────────────────────────────────────

/// Serialise a control message. Total: over-long text is truncated on a
/// character boundary instead of failing.
pub fn encode_control_message(msg: &ControlMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    match msg {
        ControlMessage::InjectKeycode {
            action,
            keycode,
            repeat,
            metastate,
        } => {
            buf.push(control_type::INJECT_KEYCODE);
            buf.push(action.code());
            buf.extend_from_slice(&keycode.to_be_bytes());
            buf.extend_from_slice(&repeat.to_be_bytes());
            buf.extend_from_slice(&metastate.0.to_be_bytes());
        }
        ControlMessage::InjectText { text } => {
            buf.push(control_type::INJECT_TEXT);
            write_string(&mut buf, text, INJECT_TEXT_MAX_LENGTH);
        }
        ControlMessage::InjectTouchEvent {
            action,
            pointer_id,
            position,
            pressure,
            buttons,
        } => {
            buf.push(control_type::INJECT_TOUCH_EVENT);
            buf.push(action.code());
            buf.extend_from_slice(&pointer_id.to_be_bytes());
            write_position(&mut buf, position);
            buf.extend_from_slice(&to_fixed_point_16(*pressure).to_be_bytes());
            buf.extend_from_slice(&buttons.0.to_be_bytes());
        }
        ControlMessage::InjectScrollEvent {
            position,
            hscroll,
            vscroll,
        } => {
            buf.push(control_type::INJECT_SCROLL_EVENT);
            write_position(&mut buf, position);
            buf.extend_from_slice(&hscroll.to_be_bytes());
            buf.extend_from_slice(&vscroll.to_be_bytes());
        }
        ControlMessage::BackOrScreenOn => buf.push(control_type::BACK_OR_SCREEN_ON),
        ControlMessage::ExpandNotificationPanel => {
            buf.push(control_type::EXPAND_NOTIFICATION_PANEL);
        }
        ControlMessage::ExpandSettingsPanel => buf.push(control_type::EXPAND_SETTINGS_PANEL),
        ControlMessage::CollapsePanels => buf.push(control_type::COLLAPSE_PANELS),
        ControlMessage::GetClipboard => buf.push(control_type::GET_CLIPBOARD),
        ControlMessage::SetClipboard { text, paste } => {
            buf.push(control_type::SET_CLIPBOARD);
            buf.push(u8::from(*paste));
            write_string(&mut buf, text, CLIPBOARD_TEXT_MAX_LENGTH);
        }
        ControlMessage::SetScreenPowerMode { mode } => {
            buf.push(control_type::SET_SCREEN_POWER_MODE);
            buf.push(mode.code());
        }
        ControlMessage::RotateDevice => buf.push(control_type::ROTATE_DEVICE),
    }
    buf
}

fn write_position(buf: &mut Vec<u8>, position: &Position) {
    buf.extend_from_slice(&position.point.x.to_be_bytes());
    buf.extend_from_slice(&position.point.y.to_be_bytes());
    buf.extend_from_slice(&position.screen_size.width.to_be_bytes());
    buf.extend_from_slice(&position.screen_size.height.to_be_bytes());
}

/// Write `[u32 length][bytes]`, truncating to at most `max_len` bytes.
fn write_string(buf: &mut Vec<u8>, text: &str, max_len: usize) {
    let text = truncate_utf8(text, max_len);
    // max_len is always below 4 GiB
    #[allow(clippy::cast_possible_truncation)]
    let len = text.len() as u32;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(text.as_bytes());
}

/// Longest prefix of `text` that fits in `max_len` bytes without splitting
/// a character.
pub(crate) fn truncate_utf8(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Map `0.0..=1.0` to a 16-bit fixed-point value, saturating at 0xFFFF.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_fixed_point_16(value: f32) -> u16 {
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    };
    let scaled = (f64::from(clamped) * 65536.0) as u32;
    scaled.min(0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use devmirror_types::{
        KeyAction, MetaState, MotionAction, MouseButtons, ScreenPowerMode, Size,
    };

    fn clipboard_frame(text: &str) -> Vec<u8> {
        encode_device_message(&DeviceMessage::Clipboard {
            text: text.to_string(),
        })
    }

    #[test]
    fn short_buffers_are_incomplete() {
        let frame = clipboard_frame("hello");
        for len in 0..5 {
            assert!(decode_device_message(&frame[..len]).unwrap().is_none());
        }
        // unknown type bytes are only inspected once a full header is there
        assert!(decode_device_message(&[0xFF, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn clipboard_consumes_exact_frame() {
        let mut bytes = clipboard_frame("hello");
        bytes.extend_from_slice(&clipboard_frame("next"));
        let (msg, consumed) = decode_device_message(&bytes).unwrap().unwrap();
        assert_eq!(consumed, 5 + 5);
        assert_eq!(
            msg,
            DeviceMessage::Clipboard {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn clipboard_waits_for_full_payload() {
        let frame = clipboard_frame("partial payload");
        for len in 5..frame.len() {
            assert!(decode_device_message(&frame[..len]).unwrap().is_none());
        }
        assert!(decode_device_message(&frame).unwrap().is_some());
    }

    #[test]
    fn empty_clipboard() {
        let (msg, consumed) = decode_device_message(&[0, 0, 0, 0, 0]).unwrap().unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(
            msg,
            DeviceMessage::Clipboard {
                text: String::new()
            }
        );
    }

    #[test]
    fn unknown_type_is_fatal() {
        for tag in [1u8, 7, 0x80, 0xFF] {
            let err = decode_device_message(&[tag, 0, 0, 0, 0]).unwrap_err();
            assert!(matches!(err, ProtocolError::UnknownMessageType(t) if t == tag));
        }
        let err = decode_device_message(&[3, 0, 0, 0, 9, 1, 2]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(3)));
    }

    #[test]
    fn oversized_clipboard_is_fatal() {
        let len = u32::try_from(DEVICE_MSG_MAX_SIZE).unwrap();
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&len.to_be_bytes());
        assert!(matches!(
            decode_device_message(&bytes),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn clipboard_text_stops_at_nul() {
        let bytes = [0, 0, 0, 0, 4, b'a', b'b', 0, b'c'];
        let (msg, consumed) = decode_device_message(&bytes).unwrap().unwrap();
        assert_eq!(consumed, 9);
        assert_eq!(
            msg,
            DeviceMessage::Clipboard {
                text: "ab".to_string()
            }
        );
    }

    #[test]
    fn inject_keycode_layout() {
        let msg = ControlMessage::InjectKeycode {
            action: KeyAction::Up,
            keycode: 66,
            repeat: 5,
            metastate: MetaState::SHIFT_ON | MetaState::META_ON,
        };
        let bytes = encode_control_message(&msg);
        assert_eq!(
            bytes,
            vec![
                0x00, // type
                0x01, // action up
                0x00, 0x00, 0x00, 0x42, // keycode
                0x00, 0x00, 0x00, 0x05, // repeat
                0x00, 0x01, 0x00, 0x01, // metastate
            ]
        );
    }

    #[test]
    fn inject_text_layout_and_truncation() {
        let bytes = encode_control_message(&ControlMessage::InjectText {
            text: "hello, world!".to_string(),
        });
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 13]);
        assert_eq!(&bytes[5..], b"hello, world!");

        let long = "é".repeat(200); // 400 bytes
        let bytes = encode_control_message(&ControlMessage::InjectText { text: long });
        let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
        assert_eq!(len, INJECT_TEXT_MAX_LENGTH);
        assert!(std::str::from_utf8(&bytes[5..]).is_ok());
    }

    #[test]
    fn truncation_never_splits_characters() {
        assert_eq!(truncate_utf8("aé", 2), "a");
        assert_eq!(truncate_utf8("aé", 3), "aé");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn inject_touch_event_layout() {
        let msg = ControlMessage::InjectTouchEvent {
            action: MotionAction::Down,
            pointer_id: 0x1234_5678_8765_4321,
            position: Position::new(100, 200, Size::new(1080, 1920)),
            pressure: 1.0,
            buttons: MouseButtons::PRIMARY,
        };
        let bytes = encode_control_message(&msg);
        assert_eq!(
            bytes,
            vec![
                0x02, // type
                0x00, // action down
                0x12, 0x34, 0x56, 0x78, 0x87, 0x65, 0x43, 0x21, // pointer id
                0x00, 0x00, 0x00, 0x64, // x
                0x00, 0x00, 0x00, 0xC8, // y
                0x04, 0x38, // width
                0x07, 0x80, // height
                0xFF, 0xFF, // pressure
                0x00, 0x00, 0x00, 0x01, // buttons
            ]
        );
    }

    #[test]
    fn inject_scroll_event_layout() {
        let msg = ControlMessage::InjectScrollEvent {
            position: Position::new(260, 1026, Size::new(1080, 1920)),
            hscroll: 1,
            vscroll: -1,
        };
        let bytes = encode_control_message(&msg);
        assert_eq!(
            bytes,
            vec![
                0x03, // type
                0x00, 0x00, 0x01, 0x04, // x
                0x00, 0x00, 0x04, 0x02, // y
                0x04, 0x38, // width
                0x07, 0x80, // height
                0x00, 0x00, 0x00, 0x01, // hscroll
                0xFF, 0xFF, 0xFF, 0xFF, // vscroll
            ]
        );
    }

    #[test]
    fn single_byte_messages() {
        let cases = [
            (ControlMessage::BackOrScreenOn, 4u8),
            (ControlMessage::ExpandNotificationPanel, 5),
            (ControlMessage::ExpandSettingsPanel, 6),
            (ControlMessage::CollapsePanels, 7),
            (ControlMessage::GetClipboard, 8),
            (ControlMessage::RotateDevice, 11),
        ];
        for (msg, code) in cases {
            assert_eq!(encode_control_message(&msg), vec![code], "{}", msg.name());
        }
    }

    #[test]
    fn set_clipboard_layout() {
        let msg = ControlMessage::SetClipboard {
            text: "hello, world!".to_string(),
            paste: true,
        };
        let bytes = encode_control_message(&msg);
        assert_eq!(bytes[0], 0x09);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(&bytes[2..6], &[0, 0, 0, 13]);
        assert_eq!(&bytes[6..], b"hello, world!");
    }

    #[test]
    fn set_screen_power_mode_layout() {
        let msg = ControlMessage::SetScreenPowerMode {
            mode: ScreenPowerMode::Normal,
        };
        assert_eq!(encode_control_message(&msg), vec![0x0A, 0x02]);
    }

    #[test]
    fn fixed_point_pressure() {
        assert_eq!(to_fixed_point_16(0.0), 0);
        assert_eq!(to_fixed_point_16(0.5), 0x8000);
        assert_eq!(to_fixed_point_16(1.0), 0xFFFF);
        assert_eq!(to_fixed_point_16(7.0), 0xFFFF);
        assert_eq!(to_fixed_point_16(-1.0), 0);
    }
}
