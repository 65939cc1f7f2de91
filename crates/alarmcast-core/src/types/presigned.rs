//! Signed read URL types
//!
//! A signed URL grants time-limited read access to one object without
//! further authentication.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Request for a read URL on (bucket, key) valid until `expires_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrlRequest {
    pub bucket: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrlRequest {
    /// Request expiring `ttl_secs` after `now`
    pub fn expiring_in(
        bucket: impl Into<String>,
        key: impl Into<String>,
        now: DateTime<Utc>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            expires_at: now + Duration::seconds(ttl_secs as i64),
        }
    }

    /// Remaining lifetime measured from `now`, checked against signer limits
    pub fn expires_in_secs(&self, now: DateTime<Utc>) -> Result<u64> {
        let remaining = (self.expires_at - now).num_seconds();
        if remaining < 0 {
            return Err(Error::UrlGeneration(format!(
                "expiry {} is already in the past",
                self.expires_at
            )));
        }
        SignedUrlLimits::validate_expires(remaining as u64)
    }
}

/// A generated read URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Limits imposed by SigV4 query signing
pub struct SignedUrlLimits;

impl SignedUrlLimits {
    /// Minimum expiration time (1 second)
    pub const MIN_EXPIRES: u64 = 1;

    /// Maximum expiration time (7 days)
    pub const MAX_EXPIRES: u64 = 7 * 24 * 60 * 60;

    pub fn validate_expires(seconds: u64) -> Result<u64> {
        if seconds < Self::MIN_EXPIRES {
            Err(Error::UrlGeneration(format!(
                "expiration must be at least {} second",
                Self::MIN_EXPIRES
            )))
        } else if seconds > Self::MAX_EXPIRES {
            Err(Error::UrlGeneration(format!(
                "expiration cannot exceed {} seconds (7 days)",
                Self::MAX_EXPIRES
            )))
        } else {
            Ok(seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_expiring_in() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        let request = SignedUrlRequest::expiring_in("b", "audio/a.mp3", now, 600);
        assert_eq!(
            request.expires_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 6, 40, 0).unwrap()
        );
        assert_eq!(request.expires_in_secs(now).unwrap(), 600);
    }

    #[test]
    fn test_expired_request_rejected() {
        let now = Utc::now();
        let request = SignedUrlRequest::expiring_in("b", "k", now, 600);
        assert!(request.expires_in_secs(now + Duration::seconds(601)).is_err());
        assert!(request.expires_in_secs(now + Duration::seconds(600)).is_err());
    }

    #[test]
    fn test_limits() {
        assert!(SignedUrlLimits::validate_expires(0).is_err());
        assert!(SignedUrlLimits::validate_expires(1).is_ok());
        assert!(SignedUrlLimits::validate_expires(600).is_ok());
        assert!(SignedUrlLimits::validate_expires(604800).is_ok());
        assert!(SignedUrlLimits::validate_expires(604801).is_err());
    }
}
