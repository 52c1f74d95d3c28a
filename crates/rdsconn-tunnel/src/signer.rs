//! SigV4 presigning of tunnel upgrade requests.
//!
//! The gateway authenticates the upgrade purely from the query string:
//! the signature binds the endpoint id, tunnel duration, target port and
//! address together with the service scope, region and signing time, so
//! none of them can be altered without invalidating the URL.

use std::time::{Duration, SystemTime};

use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
};
use aws_sigv4::sign::v4;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use rdsconn_core::{ConnError, ConnResult, SignedTunnelUrl};

/// Validity window of a presigned upgrade URL.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(60);

/// Hex SHA-256 of an empty body. Upgrades never carry a payload.
pub fn empty_payload_hash() -> String {
    hex::encode(Sha256::digest([]))
}

/// Where signing credentials and scope come from.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub credentials: SharedCredentialsProvider,
    pub region: String,
    pub service: String,
    pub url_ttl: Duration,
}

/// Fetch a fresh credential from the provider.
///
/// Failures are returned as [`ConnError::Credential`] and are not retried.
pub async fn retrieve_credentials(provider: &SharedCredentialsProvider) -> ConnResult<Credentials> {
    provider
        .provide_credentials()
        .await
        .map_err(|e| ConnError::Credential(e.to_string()))
}

/// Presign a `GET` of `url` with the given credential.
///
/// Pure: the same inputs always produce the same URL.
pub fn presign_url(
    url: &Url,
    credentials: Credentials,
    service: &str,
    region: &str,
    time: SystemTime,
    ttl: Duration,
) -> ConnResult<SignedTunnelUrl> {
    let identity = credentials.into();

    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(ttl);

    let params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(time)
        .settings(settings)
        .build()
        .map_err(|e| ConnError::Signing(e.to_string()))?
        .into();

    let signable = SignableRequest::new(
        "GET",
        url.as_str(),
        std::iter::empty(),
        SignableBody::Precomputed(empty_payload_hash()),
    )
    .map_err(|e| ConnError::Signing(e.to_string()))?;

    let (instructions, signature) = sign(signable, &params)
        .map_err(|e| ConnError::Signing(e.to_string()))?
        .into_parts();
    debug!(signature = %signature, "presigned tunnel request");

    let (_headers, query) = instructions.into_parts();
    let mut signed = url.clone();
    {
        let mut pairs = signed.query_pairs_mut();
        for (name, value) in &query {
            pairs.append_pair(name, value);
        }
    }

    Ok(SignedTunnelUrl {
        url: signed,
        expires_at: time + ttl,
    })
}

/// Retrieve credentials from `config` and presign `url` at `time`.
pub async fn sign_url(config: &SigningConfig, url: &Url, time: SystemTime) -> ConnResult<SignedTunnelUrl> {
    let credentials = retrieve_credentials(&config.credentials).await?;
    presign_url(
        url,
        credentials,
        &config.service,
        &config.region,
        time,
        config.url_ttl,
    )
}
