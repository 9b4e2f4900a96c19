//! Device session management for devmirror.
//!
//! Establishes the tunnel and the two sockets to the device, then runs the
//! components that live on them: the device message receiver, the control
//! message channel and the video stream reader feeding an optional
//! recording.

pub mod config;
pub mod controller;
pub mod error;
pub mod mirror;
pub mod receiver;
pub mod session;
pub mod setup;
pub mod socket;
pub mod state;
pub mod tunnel;

pub use config::Config;
pub use controller::{ControlSender, Controller};
pub use error::SessionError;
pub use mirror::{Mirror, MirrorReport, StopHandle, StreamReader};
pub use receiver::Receiver;
pub use session::{DeviceSession, SessionOptions, StopReport};
pub use state::SessionState;
pub use tunnel::{Tunnel, TunnelOptions};
