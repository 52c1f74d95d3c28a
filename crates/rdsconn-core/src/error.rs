use std::fmt;

use thiserror::Error;

/// Errors produced while dialing tunnels and relaying connections.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("invalid address: {0}")]
    AddressFormat(String),

    #[error("unsupported network {0:?}: only tcp and tcp4 are supported")]
    UnsupportedNetwork(String),

    #[error("resolving private address: {0}")]
    Resolve(String),

    #[error("retrieving credentials: {0}")]
    Credential(String),

    #[error("signing tunnel request: {0}")]
    Signing(String),

    #[error("dialing tunnel: {0}")]
    TunnelDial(String),

    #[error("unable to allocate local port in range {start}..{end}")]
    PortExhaustion { start: u16, end: u32 },

    #[error("{direction}: {source}")]
    RelayIo {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConnResult<T> = Result<T, ConnError>;

/// Direction of one half of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Tunnel to local client.
    RemoteToLocal,
    /// Local client to tunnel.
    LocalToRemote,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteToLocal => "remote->local",
            Self::LocalToRemote => "local->remote",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
