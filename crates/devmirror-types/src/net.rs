//! Tunnel parameters: local port ranges and tunnel direction.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default first port of the local range.
pub const DEFAULT_PORT_RANGE_FIRST: u16 = 27183;

/// Default last port of the local range.
pub const DEFAULT_PORT_RANGE_LAST: u16 = 27199;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePortRangeError {
    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("invalid port range {first}:{last} (first must not exceed last)")]
    Reversed { first: u16, last: u16 },
}

/// Inclusive range of candidate local TCP ports. `first <= last` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPortRange")]
pub struct PortRange {
    first: u16,
    last: u16,
}

#[derive(Deserialize)]
struct RawPortRange {
    first: u16,
    last: u16,
}

impl TryFrom<RawPortRange> for PortRange {
    type Error = ParsePortRangeError;

    fn try_from(raw: RawPortRange) -> Result<Self, Self::Error> {
        Self::new(raw.first, raw.last)
    }
}

impl PortRange {
    pub fn new(first: u16, last: u16) -> Result<Self, ParsePortRangeError> {
        if first > last {
            return Err(ParsePortRangeError::Reversed { first, last });
        }
        Ok(Self { first, last })
    }

    /// A range holding exactly one port.
    #[must_use]
    pub fn single(port: u16) -> Self {
        Self {
            first: port,
            last: port,
        }
    }

    #[must_use]
    pub fn first(&self) -> u16 {
        self.first
    }

    #[must_use]
    pub fn last(&self) -> u16 {
        self.last
    }

    /// Ports in ascending order. Never overflows, even when `last` is 65535.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.first..=self.last
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.last - self.first) + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            first: DEFAULT_PORT_RANGE_FIRST,
            last: DEFAULT_PORT_RANGE_LAST,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}:{}", self.first, self.last)
        }
    }
}

impl FromStr for PortRange {
    type Err = ParsePortRangeError;

    /// Parse `"first:last"` or a single `"port"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| ParsePortRangeError::InvalidPort(p.to_string()))
        };
        match s.split_once(':') {
            Some((first, last)) => Self::new(parse(first)?, parse(last)?),
            None => Ok(Self::single(parse(s)?)),
        }
    }
}

/// Direction of the bridge tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelMode {
    /// The device connects to a socket the client listens on.
    Reverse,
    /// The client connects to a socket the device listens on.
    Forward,
}

impl std::fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reverse => write!(f, "reverse"),
            Self::Forward => write!(f, "forward"),
        }
    }
}
