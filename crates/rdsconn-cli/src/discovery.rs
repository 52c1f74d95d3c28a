//! RDS instance and instance connect endpoint lookup.

use anyhow::{bail, Context, Result};
use aws_sdk_ec2::types::{Ec2InstanceConnectEndpoint, Filter};
use aws_sdk_rds::operation::describe_db_instances::DescribeDBInstancesError;
use aws_sdk_rds::types::DbInstance;
use rdsconn_core::GatewayEndpoint;
use serde::Serialize;
use tracing::debug;

/// An RDS instance as reported by `DescribeDBInstances`.
///
/// Instances that are still being created have no endpoint yet, so every
/// field beyond the identifier is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub vpc_id: Option<String>,
    pub engine: Option<String>,
}

impl InstanceSummary {
    pub fn from_db_instance(instance: &DbInstance) -> Option<Self> {
        let id = instance.db_instance_identifier()?.to_string();
        let endpoint = instance.endpoint();
        Some(Self {
            id,
            address: endpoint.and_then(|e| e.address()).map(str::to_string),
            port: endpoint
                .and_then(|e| e.port())
                .and_then(|p| u16::try_from(p).ok()),
            vpc_id: instance
                .db_subnet_group()
                .and_then(|g| g.vpc_id())
                .map(str::to_string),
            engine: instance.engine().map(str::to_string),
        })
    }

    /// The connection details needed to proxy to this instance.
    pub fn target(&self) -> Result<ProxyTarget> {
        let (Some(address), Some(port)) = (&self.address, self.port) else {
            bail!("instance {} has no endpoint yet", self.id);
        };
        let vpc_id = self
            .vpc_id
            .clone()
            .with_context(|| format!("instance {} is not in a VPC", self.id))?;
        Ok(ProxyTarget {
            address: address.clone(),
            port,
            vpc_id,
        })
    }
}

/// Where the tunnel must lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub address: String,
    pub port: u16,
    pub vpc_id: String,
}

impl ProxyTarget {
    /// `host:port` dial target for the relay.
    pub fn dial_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// All RDS instances visible to the caller, sorted by identifier.
pub async fn list_instances(client: &aws_sdk_rds::Client) -> Result<Vec<InstanceSummary>> {
    let mut pages = client.describe_db_instances().into_paginator().send();
    let mut instances = Vec::new();
    while let Some(page) = pages.next().await {
        let page = page.context("failed to describe RDS instances")?;
        instances.extend(
            page.db_instances()
                .iter()
                .filter_map(InstanceSummary::from_db_instance),
        );
    }
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(count = instances.len(), "listed RDS instances");
    Ok(instances)
}

/// Look up a single RDS instance by identifier.
pub async fn describe_instance(client: &aws_sdk_rds::Client, id: &str) -> Result<InstanceSummary> {
    let output = match client
        .describe_db_instances()
        .db_instance_identifier(id)
        .send()
        .await
    {
        Ok(output) => output,
        Err(e) if is_instance_not_found(e.as_service_error()) => {
            bail!("instance not found: {id}")
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to describe RDS instance {id}"))
        }
    };
    output
        .db_instances()
        .iter()
        .find_map(InstanceSummary::from_db_instance)
        .with_context(|| format!("instance not found: {id}"))
}

fn is_instance_not_found(err: Option<&DescribeDBInstancesError>) -> bool {
    err.is_some_and(DescribeDBInstancesError::is_db_instance_not_found_fault)
}

/// Ask the user to pick one of `instances`.
pub async fn select_instance(instances: Vec<InstanceSummary>) -> Result<InstanceSummary> {
    if instances.is_empty() {
        bail!("no RDS instances found");
    }
    let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
    let index = tokio::task::spawn_blocking(move || {
        dialoguer::Select::new()
            .with_prompt("Select an RDS instance")
            .items(&ids)
            .default(0)
            .interact()
    })
    .await
    .context("instance prompt panicked")?
    .context("failed to read instance selection")?;

    instances
        .into_iter()
        .nth(index)
        .context("selection out of range")
}

/// The first instance connect endpoint in `vpc_id`.
pub async fn find_endpoint_for_vpc(
    client: &aws_sdk_ec2::Client,
    vpc_id: &str,
) -> Result<GatewayEndpoint> {
    let output = client
        .describe_instance_connect_endpoints()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .send()
        .await
        .context("failed to describe instance connect endpoints")?;
    first_usable(output.instance_connect_endpoints())
        .with_context(|| format!("no instance connect endpoints found for vpc {vpc_id}"))
}

/// Resolve an explicitly chosen endpoint id to its DNS name.
pub async fn describe_endpoint(client: &aws_sdk_ec2::Client, id: &str) -> Result<GatewayEndpoint> {
    let output = client
        .describe_instance_connect_endpoints()
        .instance_connect_endpoint_ids(id)
        .send()
        .await
        .with_context(|| format!("failed to describe instance connect endpoint {id}"))?;
    first_usable(output.instance_connect_endpoints())
        .with_context(|| format!("instance connect endpoint not found: {id}"))
}

fn first_usable(endpoints: &[Ec2InstanceConnectEndpoint]) -> Option<GatewayEndpoint> {
    endpoints.iter().find_map(|e| {
        let id = e.instance_connect_endpoint_id()?;
        let dns_name = e.dns_name()?;
        Some(GatewayEndpoint::new(id, dns_name))
    })
}
