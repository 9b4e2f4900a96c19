//! Host-side bridge and companion-process control for devmirror.
//!
//! This crate defines the [`Bridge`] trait for the tunnel primitives the
//! host utility offers (reverse and forward routing between a local TCP
//! port and a named socket on the device), and the [`Companion`] trait for
//! observing and terminating the process that runs on the device side.
//! [`adb::AdbBridge`] drives the real utility through subprocesses.

pub mod adb;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;

pub use adb::AdbBridge;
pub use error::BridgeError;

/// Tunnel primitives of the host-side bridge.
///
/// Each operation reports plain success or failure.
pub trait Bridge: Send + Sync + 'static {
    /// Route connections the device makes to `socket_name` onto local `port`.
    fn reverse(&self, socket_name: &str, port: u16) -> Result<(), BridgeError>;

    /// Remove a route created by [`Bridge::reverse`].
    fn remove_reverse(&self, socket_name: &str) -> Result<(), BridgeError>;

    /// Route connections made to local `port` onto the device's `socket_name`.
    fn forward(&self, port: u16, socket_name: &str) -> Result<(), BridgeError>;

    /// Remove a route created by [`Bridge::forward`].
    fn remove_forward(&self, port: u16) -> Result<(), BridgeError>;

    /// Start the companion process on the device with opaque arguments.
    fn start_companion(&self, args: &[String]) -> Result<Box<dyn Companion>, BridgeError>;
}

/// Lifecycle probe for the device-side companion process.
///
/// All methods take `&self`: a watchdog thread blocks in [`Companion::wait`]
/// while the stop path may call [`Companion::kill`] concurrently.
pub trait Companion: Send + Sync + 'static {
    /// Whether the process is still running.
    fn is_running(&self) -> bool;

    /// Block until the process has exited.
    fn wait(&self) -> Result<(), BridgeError>;

    /// Forcefully terminate the process.
    fn kill(&self) -> Result<(), BridgeError>;
}
