//! Tunnel dialer.
//!
//! Owns the gateway endpoint identity and the requested tunnel lifetime.
//! Each [`TunnelDialer::open`] resolves the target to a literal address,
//! presigns a fresh `openTunnel` URL and upgrades it into a
//! [`TunnelStream`]. No retries happen here.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime};

use aws_credential_types::provider::SharedCredentialsProvider;
use tokio::net;
use tracing::{debug, info};

use rdsconn_core::{
    ConnError, ConnResult, GatewayEndpoint, TunnelRequest, DEFAULT_MAX_TUNNEL_DURATION,
    SERVICE_SCOPE,
};

use crate::signer::{sign_url, SigningConfig, DEFAULT_URL_TTL};
use crate::transport::{self, Dial, TunnelStream};

/// Opens signed tunnels through one instance connect endpoint.
///
/// Configuration is read-only after construction, so a single dialer can be
/// shared by every relay session.
#[derive(Debug, Clone)]
pub struct TunnelDialer {
    signing: SigningConfig,
    endpoint: GatewayEndpoint,
    max_duration: Duration,
    secure: bool,
}

impl TunnelDialer {
    /// Create a dialer. A zero `max_duration` means one hour.
    pub fn new(
        credentials: SharedCredentialsProvider,
        region: impl Into<String>,
        endpoint: GatewayEndpoint,
        max_duration: Duration,
    ) -> Self {
        let max_duration = if max_duration.is_zero() {
            DEFAULT_MAX_TUNNEL_DURATION
        } else {
            max_duration
        };

        Self {
            signing: SigningConfig {
                credentials,
                region: region.into(),
                service: SERVICE_SCOPE.to_string(),
                url_ttl: DEFAULT_URL_TTL,
            },
            endpoint,
            max_duration,
            secure: true,
        }
    }

    /// How long a presigned URL stays valid.
    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.signing.url_ttl = ttl;
        self
    }

    /// Upgrade over plain `ws://` instead of `wss://`.
    ///
    /// Only meaningful for locally hosted gateways; the managed service
    /// rejects anything but TLS.
    pub fn with_plaintext(mut self) -> Self {
        self.secure = false;
        self
    }

    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn region(&self) -> &str {
        &self.signing.region
    }

    /// Open a tunnel to `address` (`host:port`).
    ///
    /// Only `tcp` and `tcp4` are accepted; any other network fails before
    /// any I/O happens.
    pub async fn open(&self, network: &str, address: &str) -> ConnResult<TunnelStream> {
        check_network(network)?;
        let (host, port) = split_host_port(address)?;
        let private_ip = resolve_private_ip(&host, port, network).await?;

        let request = TunnelRequest {
            endpoint_id: self.endpoint.id.clone(),
            max_duration: self.max_duration,
            remote_port: port,
            private_ip,
        };
        let url = request
            .to_url(&self.endpoint.dns_name, self.secure)
            .map_err(|e| {
                ConnError::TunnelDial(format!(
                    "invalid gateway name {:?}: {e}",
                    self.endpoint.dns_name
                ))
            })?;

        let signed = sign_url(&self.signing, &url, SystemTime::now()).await?;

        info!(
            endpoint = %self.endpoint.id,
            target = %SocketAddr::new(private_ip, port),
            "opening tunnel"
        );
        transport::connect(&signed).await
    }
}

impl Dial for TunnelDialer {
    type Stream = TunnelStream;

    fn open<'a>(
        &'a self,
        network: &'a str,
        address: &'a str,
    ) -> impl std::future::Future<Output = ConnResult<TunnelStream>> + Send + 'a {
        TunnelDialer::open(self, network, address)
    }
}

/// Only TCP targets can be tunnelled.
pub fn check_network(network: &str) -> ConnResult<()> {
    match network {
        "tcp" | "tcp4" => Ok(()),
        other => Err(ConnError::UnsupportedNetwork(other.to_string())),
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts (`[fd00::1]:5432`).
pub fn split_host_port(address: &str) -> ConnResult<(String, u16)> {
    let malformed = |reason: &str| ConnError::AddressFormat(format!("{address:?}: {reason}"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| malformed("missing ']' in address"))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| malformed("missing port in address"))?;
        (host, port)
    } else {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| malformed("missing port in address"))?;
        if host.contains(':') {
            return Err(malformed("too many colons in address"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(malformed("missing host"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| malformed("invalid port"))?;

    Ok((host.to_string(), port))
}

/// Resolve `host` to the literal address the gateway will route to.
///
/// IPv4 is preferred; `tcp4` requires it.
pub async fn resolve_private_ip(host: &str, port: u16, network: &str) -> ConnResult<IpAddr> {
    let v4_only = network == "tcp4";

    if let Ok(ip) = host.parse::<IpAddr>() {
        if v4_only && !ip.is_ipv4() {
            return Err(ConnError::Resolve(format!("{host} is not an IPv4 address")));
        }
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = net::lookup_host((host, port))
        .await
        .map_err(|e| ConnError::Resolve(format!("{host}: {e}")))?
        .map(|addr| addr.ip())
        .collect();

    let chosen = addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| if v4_only { None } else { addrs.first() })
        .copied()
        .ok_or_else(|| ConnError::Resolve(format!("no usable addresses for {host}")))?;

    debug!(host = %host, resolved = %chosen, "resolved private address");
    Ok(chosen)
}
