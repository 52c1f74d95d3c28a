//! Local listener and port allocation.
//!
//! A fixed port is bound as requested. Otherwise ports are probed upwards
//! from the remote service's port so clients that assume the standard port
//! usually just work.

use std::net::Ipv4Addr;

use tokio::net::TcpListener;
use tracing::{debug, info};

use rdsconn_core::{ConnError, ConnResult};

/// Number of ports probed when no local port is requested.
pub const PORT_SCAN_WIDTH: u16 = 100;

/// Bind the local listener on the loopback interface.
///
/// With `requested_port != 0` that port is bound exactly and a bind error is
/// returned as-is. With `0`, the first free port in
/// `[remote_port, remote_port + 100)` wins.
pub async fn allocate(requested_port: u16, remote_port: u16) -> ConnResult<(TcpListener, u16)> {
    if requested_port != 0 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, requested_port)).await?;
        let port = listener.local_addr()?.port();
        info!(port, "bound requested local port");
        return Ok((listener, port));
    }

    scan(remote_port, PORT_SCAN_WIDTH).await
}

async fn scan(start: u16, width: u16) -> ConnResult<(TcpListener, u16)> {
    let end = (u32::from(start) + u32::from(width)).min(u32::from(u16::MAX) + 1);

    for port in u32::from(start)..end {
        // `end` is clamped above, so the port always fits.
        let port = port as u16;
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => {
                let chosen = listener.local_addr()?.port();
                info!(port = chosen, remote_port = start, "bound local port");
                return Ok((listener, chosen));
            }
            Err(e) => debug!(port, error = %e, "local port unavailable"),
        }
    }

    Err(ConnError::PortExhaustion { start, end })
}
