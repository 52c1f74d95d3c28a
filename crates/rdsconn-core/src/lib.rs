//! rdsconn-core: shared types for the rdsconn tunnel proxy.
//!
//! Provides the error taxonomy, relay directions, and the data model of a
//! tunnel request brokered through an EC2 Instance Connect Endpoint:
//! gateway endpoint identity, the per-dial request, and the signed URL.

pub mod error;
pub mod request;

// Re-export commonly used items at crate root.
pub use error::{ConnError, ConnResult, Direction};
pub use request::{
    GatewayEndpoint, SignedTunnelUrl, TunnelRequest, DEFAULT_MAX_TUNNEL_DURATION,
    OPEN_TUNNEL_PATH, SERVICE_SCOPE,
};
