//! Data model of one brokered tunnel.
//!
//! A [`TunnelRequest`] is built fresh for every dial and rendered into the
//! unsigned `openTunnel` URL. The query parameter names are the gateway's
//! fixed contract and must match it exactly.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use url::Url;

/// Signing scope (service name) of the instance connect gateway.
pub const SERVICE_SCOPE: &str = "ec2-instance-connect";

/// Request path of the tunnel upgrade endpoint.
pub const OPEN_TUNNEL_PATH: &str = "/openTunnel";

/// Tunnel lifetime requested when none is configured.
pub const DEFAULT_MAX_TUNNEL_DURATION: Duration = Duration::from_secs(3600);

pub const PARAM_ENDPOINT_ID: &str = "instanceConnectEndpointId";
pub const PARAM_MAX_DURATION: &str = "maxTunnelDuration";
pub const PARAM_PRIVATE_IP: &str = "privateIpAddress";
pub const PARAM_REMOTE_PORT: &str = "remotePort";

/// Identity and routable name of an instance connect endpoint.
///
/// Resolved once per dialer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Opaque endpoint id, e.g. `eice-0123456789abcdef0`.
    pub id: String,
    /// DNS name the tunnel upgrade is sent to. May carry an explicit port.
    pub dns_name: String,
}

impl GatewayEndpoint {
    pub fn new(id: impl Into<String>, dns_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dns_name: dns_name.into(),
        }
    }
}

/// A single tunnel request. The target must already be a literal address;
/// the gateway does not resolve names on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub endpoint_id: String,
    pub max_duration: Duration,
    pub remote_port: u16,
    pub private_ip: IpAddr,
}

impl TunnelRequest {
    /// Query parameters in the order the gateway's reference client encodes
    /// them (sorted by key).
    pub fn query_pairs(&self) -> [(&'static str, String); 4] {
        [
            (PARAM_ENDPOINT_ID, self.endpoint_id.clone()),
            (PARAM_MAX_DURATION, self.max_duration.as_secs().to_string()),
            (PARAM_PRIVATE_IP, self.private_ip.to_string()),
            (PARAM_REMOTE_PORT, self.remote_port.to_string()),
        ]
    }

    /// Render the unsigned upgrade URL against `dns_name`.
    ///
    /// `secure` selects `wss` (the only scheme the real gateway accepts) or
    /// plain `ws` for locally hosted gateways.
    pub fn to_url(&self, dns_name: &str, secure: bool) -> Result<Url, url::ParseError> {
        let scheme = if secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{dns_name}{OPEN_TUNNEL_PATH}"))?;
        url.query_pairs_mut().extend_pairs(self.query_pairs());
        Ok(url)
    }
}

/// A presigned upgrade URL. Single use: sign immediately before dialing.
#[derive(Debug, Clone)]
pub struct SignedTunnelUrl {
    pub url: Url,
    pub expires_at: SystemTime,
}

impl SignedTunnelUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Value of a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}
