//! Object-store access for Alarmcast
//!
//! The handler only needs one capability from the object store: a signed,
//! time-limited read URL for a finalized object.

pub mod s3;
pub mod signer;

pub use s3::SdkSigner;
pub use signer::{OfflineSigner, UrlSigner};

use alarmcast_core::config::{SignerKind, StorageConfig};
use alarmcast_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Build the signer selected by the storage configuration
pub async fn signer_from_config(config: &StorageConfig) -> Result<Arc<dyn UrlSigner>> {
    match config.signer {
        SignerKind::Offline => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                Error::InvalidConfig("offline signer requires storage.endpoint".into())
            })?;
            let access_key = config.access_key.as_deref().ok_or_else(|| {
                Error::InvalidConfig("offline signer requires storage.access_key".into())
            })?;
            let secret_key = config.secret_key.as_deref().ok_or_else(|| {
                Error::InvalidConfig("offline signer requires storage.secret_key".into())
            })?;

            let signer = OfflineSigner::new(endpoint, access_key, secret_key, &config.region)?
                .path_style(config.path_style);
            info!(endpoint, region = %config.region, "Using offline URL signer");
            Ok(Arc::new(signer))
        }
        SignerKind::Sdk => {
            let signer = SdkSigner::from_config(config).await?;
            info!(
                region = %config.region,
                verify_exists = config.verify_exists,
                "Using SDK URL signer"
            );
            Ok(Arc::new(signer))
        }
    }
}
