//! `rdsconn proxy [INSTANCE_ID]`: serve local connections to an RDS instance.
//!
//! Resolves the instance, finds an instance connect endpoint in its VPC,
//! binds a loopback port and relays every accepted connection through a
//! freshly signed tunnel until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::SdkConfig;
use rdsconn_tunnel::{allocate, RelayServer, TunnelDialer};
use tracing::{debug, info};

use crate::discovery;

/// Effective proxy settings after merging flags and config.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub instance_id: Option<String>,
    pub endpoint_id: Option<String>,
    pub local_port: u16,
    pub max_tunnel_duration: u64,
}

pub async fn run(sdk: &SdkConfig, opts: ProxyOptions) -> Result<()> {
    let rds = aws_sdk_rds::Client::new(sdk);
    let instance = match &opts.instance_id {
        Some(id) => discovery::describe_instance(&rds, id).await?,
        None => discovery::select_instance(discovery::list_instances(&rds).await?).await?,
    };
    let target = instance.target()?;
    debug!(instance = %instance.id, target = %target.dial_address(), vpc = %target.vpc_id, "resolved instance");

    let ec2 = aws_sdk_ec2::Client::new(sdk);
    let endpoint = match &opts.endpoint_id {
        Some(id) => discovery::describe_endpoint(&ec2, id).await?,
        None => discovery::find_endpoint_for_vpc(&ec2, &target.vpc_id).await?,
    };
    info!(endpoint = %endpoint.id, instance = %instance.id, "using instance connect endpoint");

    let credentials = sdk
        .credentials_provider()
        .context("no AWS credentials provider configured")?;
    let region = sdk
        .region()
        .context("no AWS region configured; pass --region or set AWS_REGION")?
        .to_string();
    let dialer = TunnelDialer::new(
        credentials,
        region,
        endpoint,
        Duration::from_secs(opts.max_tunnel_duration),
    );

    let (listener, port) = allocate(opts.local_port, target.port)
        .await
        .context("failed to bind local listener")?;
    eprintln!("Proxy running. Now waiting to serve connections to localhost:{port}...");

    let server = RelayServer::new(listener, Arc::new(dialer), target.dial_address());
    tokio::select! {
        result = server.run() => result.context("local listener failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}
