//! Session state machine.

/// State of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Negotiating the tunnel.
    Establishing,
    /// Tunnel up, companion starting.
    TunnelUp,
    /// Both sockets open, handshake not read yet.
    Connected,
    /// Handshake read; the session is usable.
    Active,
    /// Torn down on request.
    Stopped,
    /// Establishment failed.
    Failed,
}

impl SessionState {
    /// Whether the session has ended, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Establishing => write!(f, "Establishing"),
            Self::TunnelUp => write!(f, "TunnelUp"),
            Self::Connected => write!(f, "Connected"),
            Self::Active => write!(f, "Active"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
