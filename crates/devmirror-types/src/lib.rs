//! Shared types for devmirror.
//!
//! This crate contains all types shared across the devmirror workspace:
//! input-injection payloads, screen geometry, the device identity read
//! during the session handshake, elementary-stream packets, tunnel
//! parameters, and the messages exchanged over the control socket.

pub mod device;
pub mod event;
pub mod message;
pub mod net;
pub mod packet;
pub mod screen;

pub use device::DeviceInfo;
pub use event::{KeyAction, MetaState, MotionAction, MouseButtons, ScreenPowerMode};
pub use message::{ControlMessage, DeviceMessage};
pub use net::{ParsePortRangeError, PortRange, TunnelMode};
pub use packet::MediaPacket;
pub use screen::{Point, Position, Size};
