//! presign command - print the signed URL the handler would publish

use alarmcast_core::types::SignedUrlRequest;
use alarmcast_core::NotifierConfig;
use anyhow::Result;
use chrono::Utc;
use tracing::debug;

pub async fn presign(
    config: NotifierConfig,
    bucket: &str,
    key: &str,
    expires: Option<u64>,
) -> Result<()> {
    config.validate()?;

    let ttl = expires.unwrap_or(config.storage.url_expiry_secs);
    debug!(bucket, key, ttl, "Generating signed URL");

    let signer = alarmcast_storage::signer_from_config(&config.storage).await?;
    let request = SignedUrlRequest::expiring_in(bucket, key, Utc::now(), ttl);
    let signed = signer.signed_read_url(&request).await?;

    println!("{}", signed.url);
    Ok(())
}
