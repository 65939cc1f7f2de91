//! AWS SDK backed signer
//!
//! Uses the SDK credential chain (or static keys from the config), checks
//! that the object exists, then presigns a `GetObject` request.

use crate::signer::UrlSigner;
use alarmcast_core::config::StorageConfig;
use alarmcast_core::types::{SignedUrl, SignedUrlRequest};
use alarmcast_core::{Error, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

pub struct SdkSigner {
    client: Client,
    verify_exists: bool,
}

impl SdkSigner {
    pub fn new(client: Client, verify_exists: bool) -> Self {
        Self {
            client,
            verify_exists,
        }
    }

    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&shared).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "alarmcast");
            builder = builder.credentials_provider(credentials);
        }

        Ok(Self::new(
            Client::from_conf(builder.build()),
            config.verify_exists,
        ))
    }

    async fn ensure_exists(&self, request: &SignedUrlRequest) -> Result<()> {
        self.client
            .head_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| map_head_error(err, request))
    }
}

#[async_trait]
impl UrlSigner for SdkSigner {
    async fn signed_read_url(&self, request: &SignedUrlRequest) -> Result<SignedUrl> {
        if self.verify_exists {
            self.ensure_exists(request).await?;
        }

        let expires_in = request.expires_in_secs(Utc::now())?;
        let presign_config = PresigningConfig::builder()
            .expires_in(Duration::from_secs(expires_in))
            .build()
            .map_err(|e| Error::UrlGeneration(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .presigned(presign_config)
            .await
            .map_err(|e| Error::UrlGeneration(DisplayErrorContext(&e).to_string()))?;

        debug!(
            bucket = %request.bucket,
            key = %request.key,
            expires_in,
            "Presigned GetObject"
        );

        Ok(SignedUrl {
            url: presigned.uri().to_string(),
            expires_at: request.expires_at,
        })
    }
}

fn map_head_error(err: SdkError<HeadObjectError>, request: &SignedUrlRequest) -> Error {
    let status = err.raw_response().map(|r| r.status().as_u16());
    match status {
        Some(404) => Error::NoSuchKey {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
        },
        Some(403) => Error::AccessDenied {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
        },
        _ => Error::UrlGeneration(DisplayErrorContext(&err).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmcast_core::config::SignerKind;

    fn static_config() -> StorageConfig {
        StorageConfig {
            signer: SignerKind::Sdk,
            endpoint: Some("http://localhost:9000".into()),
            access_key: Some("minioadmin".into()),
            secret_key: Some("minioadmin".into()),
            verify_exists: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_presign_without_existence_check() {
        let signer = SdkSigner::from_config(&static_config()).await.unwrap();
        let request = SignedUrlRequest::expiring_in("alarms", "audio/alarm1.mp3", Utc::now(), 600);

        let signed = signer.signed_read_url(&request).await.unwrap();
        assert!(signed
            .url
            .starts_with("http://localhost:9000/alarms/audio/alarm1.mp3?"));
        assert!(signed.url.contains("X-Amz-Expires=600") || signed.url.contains("X-Amz-Expires=599"));
        assert!(signed.url.contains("X-Amz-Signature="));
        assert_eq!(signed.expires_at, request.expires_at);
    }

    #[tokio::test]
    async fn test_expired_request_rejected_before_signing() {
        let signer = SdkSigner::from_config(&static_config()).await.unwrap();
        let past = Utc::now() - chrono::Duration::seconds(3600);
        let request = SignedUrlRequest::expiring_in("alarms", "audio/alarm1.mp3", past, 600);

        let err = signer.signed_read_url(&request).await.unwrap_err();
        assert!(err.is_url_generation());
    }
}
