//! Upload handler
//!
//! One finalization event in, at most one notification out. Paths outside
//! `audio/` are dropped before anything touches the network.

use alarmcast_core::types::{NotificationPayload, SignedUrlRequest, UploadEvent};
use alarmcast_core::{BrokerSettings, Result, AUDIO_PREFIX, SIGNED_URL_TTL_SECS};
use alarmcast_mqtt::{BrokerConnector, PublishReceipt, Publisher, RumqttcConnector};
use alarmcast_storage::UrlSigner;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::metrics;

/// Result of one handler invocation
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// Not an audio upload
    Skipped,
    Published(PublishReceipt),
}

impl HandleOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, HandleOutcome::Published(_))
    }
}

pub struct UploadHandler {
    signer: Arc<dyn UrlSigner>,
    publisher: Publisher,
    url_ttl_secs: u64,
}

impl UploadHandler {
    pub fn new(signer: Arc<dyn UrlSigner>, settings: BrokerSettings) -> Self {
        Self::with_connector(signer, settings, Arc::new(RumqttcConnector))
    }

    pub fn with_connector(
        signer: Arc<dyn UrlSigner>,
        settings: BrokerSettings,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            signer,
            publisher: Publisher::with_connector(settings, connector),
            url_ttl_secs: SIGNED_URL_TTL_SECS,
        }
    }

    /// Override the signed URL lifetime
    pub fn url_ttl_secs(mut self, secs: u64) -> Self {
        self.url_ttl_secs = secs;
        self
    }

    pub fn is_audio_path(path: &str) -> bool {
        path.starts_with(AUDIO_PREFIX)
    }

    pub async fn handle(&self, event: &UploadEvent) -> Result<HandleOutcome> {
        metrics::record_event_received();

        if !Self::is_audio_path(&event.path) {
            debug!(bucket = %event.bucket, path = %event.path, "Not an audio upload, skipping");
            metrics::record_event_skipped();
            return Ok(HandleOutcome::Skipped);
        }

        match self.notify(event).await {
            Ok(receipt) => {
                metrics::record_published(receipt.elapsed);
                Ok(HandleOutcome::Published(receipt))
            }
            Err(err) => {
                error!(
                    bucket = %event.bucket,
                    path = %event.path,
                    code = err.code(),
                    "Upload notification failed: {}",
                    err
                );
                metrics::record_failure(err.code());
                Err(err)
            }
        }
    }

    async fn notify(&self, event: &UploadEvent) -> Result<PublishReceipt> {
        event.validate()?;
        info!(bucket = %event.bucket, path = %event.path, "Audio upload detected");

        let request = SignedUrlRequest::expiring_in(
            event.bucket.clone(),
            event.path.clone(),
            Utc::now(),
            self.url_ttl_secs,
        );
        let signed = self.signer.signed_read_url(&request).await?;
        debug!(url = %signed.url, expires_at = %signed.expires_at, "Signed URL generated");

        let payload = NotificationPayload::new(signed.url, Utc::now(), &event.path);
        self.publisher.publish(&payload).await
    }
}
