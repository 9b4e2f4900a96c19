//! Wire protocol for devmirror.
//!
//! This crate handles the binary formats spoken over the two device
//! sockets: control messages (client -> device), device messages
//! (device -> client), the device-info handshake that opens the video
//! socket, and the framing of elementary-stream packets that follows it.
//!
//! Everything here is pure over byte slices, except a few thin
//! [`std::io::Read`] helpers that pull exactly one record off a socket.

pub mod error;
pub mod handshake;
pub mod stream;
pub mod wire;

pub use error::ProtocolError;
pub use handshake::{read_device_info, DEVICE_NAME_FIELD_LENGTH, HANDSHAKE_SIZE};
pub use stream::read_packet;
pub use wire::{
    decode_device_message, encode_control_message, CONTROL_MSG_MAX_SIZE, DEVICE_MSG_MAX_SIZE,
};
