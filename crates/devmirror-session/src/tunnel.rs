//! Tunnel establishment over the host bridge.
//!
//! Reverse mode is tried first: the device connects to us, so we can listen
//! before the companion even starts. Forward mode is the fallback when the
//! bridge cannot route inbound connections.

use std::sync::Arc;

use devmirror_bridge::Bridge;
use devmirror_types::{PortRange, TunnelMode};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::socket::ListenerSlot;

/// Parameters for [`Tunnel::establish`].
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub socket_name: String,
    pub port_range: PortRange,
    pub force_forward: bool,
}

/// An established route between a local port and the device socket.
pub struct Tunnel {
    bridge: Arc<dyn Bridge>,
    socket_name: String,
    port: u16,
    mode: TunnelMode,
    enabled: bool,
    listener: Option<ListenerSlot>,
}

impl Tunnel {
    /// Negotiate a port, trying reverse mode first unless forwarding is forced.
    pub fn establish(
        bridge: Arc<dyn Bridge>,
        options: &TunnelOptions,
    ) -> Result<Self, SessionError> {
        if !options.force_forward {
            if let Some((port, listener)) = reverse_any_port(bridge.as_ref(), options) {
                info!(port, "reverse tunnel established");
                return Ok(Self {
                    bridge,
                    socket_name: options.socket_name.clone(),
                    port,
                    mode: TunnelMode::Reverse,
                    enabled: true,
                    listener: Some(listener),
                });
            }
            warn!("reverse tunnel failed, falling back to forward");
        }

        let port = forward_any_port(bridge.as_ref(), options).ok_or_else(|| {
            SessionError::Tunnel(format!(
                "could not establish a tunnel on any port in {}",
                options.port_range
            ))
        })?;
        info!(port, "forward tunnel established");
        Ok(Self {
            bridge,
            socket_name: options.socket_name.clone(),
            port,
            mode: TunnelMode::Forward,
            enabled: true,
            listener: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn mode(&self) -> TunnelMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The listening socket, in reverse mode. Can be taken once.
    pub fn take_listener(&mut self) -> Option<ListenerSlot> {
        self.listener.take()
    }

    /// Remove the route with the operation matching the mode.
    ///
    /// Runs at most once; failures are logged and otherwise ignored.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        let result = match self.mode {
            TunnelMode::Reverse => self.bridge.remove_reverse(&self.socket_name),
            TunnelMode::Forward => self.bridge.remove_forward(self.port),
        };
        match result {
            Ok(()) => debug!(mode = %self.mode, port = self.port, "tunnel removed"),
            Err(e) => {
                warn!(mode = %self.mode, port = self.port, error = %e, "could not remove tunnel");
            }
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Returns `None` if reverse mode is unusable; the caller falls back.
fn reverse_any_port(
    bridge: &dyn Bridge,
    options: &TunnelOptions,
) -> Option<(u16, ListenerSlot)> {
    for port in options.port_range.ports() {
        if let Err(e) = bridge.reverse(&options.socket_name, port) {
            // not port-dependent: other ports would fail the same way
            warn!(port, error = %e, "could not create reverse route");
            return None;
        }
        match ListenerSlot::bind(port) {
            Ok(listener) => return Some((port, listener)),
            Err(e) => {
                debug!(port, error = %e, "could not listen, trying next port");
                if let Err(e) = bridge.remove_reverse(&options.socket_name) {
                    warn!(port, error = %e, "could not remove reverse route");
                }
            }
        }
    }
    warn!(range = %options.port_range, "no free port for reverse tunnel");
    None
}

fn forward_any_port(bridge: &dyn Bridge, options: &TunnelOptions) -> Option<u16> {
    for port in options.port_range.ports() {
        match bridge.forward(port, &options.socket_name) {
            Ok(()) => return Some(port),
            Err(e) => debug!(port, error = %e, "could not forward, trying next port"),
        }
    }
    None
}
