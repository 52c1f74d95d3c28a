//! AWS SDK configuration loading.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::debug;

/// Load the SDK config through the default provider chain, applying the
/// region and profile overrides when given.
///
/// Fails when no region can be determined: the signing scope and the
/// endpoint lookups both need one.
pub async fn load_sdk_config(region: Option<String>, profile: Option<String>) -> Result<SdkConfig> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    let sdk = loader.load().await;

    let region = sdk
        .region()
        .context("no AWS region configured; pass --region or set AWS_REGION")?;
    debug!(region = %region, "loaded AWS config");
    Ok(sdk)
}
