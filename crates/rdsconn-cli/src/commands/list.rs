//! `rdsconn list`: print the RDS instances visible to the caller.

use anyhow::Result;
use aws_config::SdkConfig;

use crate::discovery;

/// Print one instance id per line, or a JSON array with `json`.
pub async fn run(sdk: &SdkConfig, json: bool) -> Result<()> {
    let client = aws_sdk_rds::Client::new(sdk);
    let instances = discovery::list_instances(&client).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
    } else {
        for instance in &instances {
            println!("{}", instance.id);
        }
    }
    Ok(())
}
