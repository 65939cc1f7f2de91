//! Signed URL generation
//!
//! `OfflineSigner` produces AWS SigV4 query-signed GET URLs from static
//! credentials without contacting the store.

use alarmcast_core::types::{SignedUrl, SignedUrlRequest};
use alarmcast_core::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Object-store collaborator used by the upload handler
#[async_trait]
pub trait UrlSigner: Send + Sync {
    /// Generate a read URL for the requested object, valid until
    /// `request.expires_at`
    async fn signed_read_url(&self, request: &SignedUrlRequest) -> Result<SignedUrl>;
}

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// SigV4 query signer for S3-compatible endpoints
#[derive(Clone)]
pub struct OfflineSigner {
    endpoint: Url,
    access_key: String,
    secret_key: String,
    region: String,
    path_style: bool,
}

impl OfflineSigner {
    pub fn new(endpoint: &str, access_key: &str, secret_key: &str, region: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::InvalidConfig(format!("Invalid storage endpoint: {}", e)))?;
        if endpoint.host_str().is_none() {
            return Err(Error::InvalidConfig("No host in storage endpoint".into()));
        }

        Ok(Self {
            endpoint,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            region: region.to_string(),
            path_style: true,
        })
    }

    /// Use `https://endpoint/bucket/key` (true) or `https://bucket.endpoint/key`
    pub fn path_style(mut self, enabled: bool) -> Self {
        self.path_style = enabled;
        self
    }

    /// Sign as if the current time were `now`
    pub fn sign_at(&self, request: &SignedUrlRequest, now: DateTime<Utc>) -> Result<SignedUrl> {
        if request.bucket.is_empty() || request.key.is_empty() {
            return Err(Error::UrlGeneration("bucket and key are required".into()));
        }
        let expires_in = request.expires_in_secs(now)?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);

        let (host, canonical_uri) = self.host_and_path(request)?;

        let mut query: BTreeMap<&str, String> = BTreeMap::new();
        query.insert("X-Amz-Algorithm", ALGORITHM.to_string());
        query.insert(
            "X-Amz-Credential",
            format!("{}/{}", self.access_key, credential_scope),
        );
        query.insert("X-Amz-Date", amz_date.clone());
        query.insert("X-Amz-Expires", expires_in.to_string());
        query.insert("X-Amz-SignedHeaders", "host".to_string());

        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri, canonical_query, host, UNSIGNED_PAYLOAD
        );
        debug!("Canonical request for signing:\n{}", canonical_request);

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.signature(&date_stamp, &string_to_sign);

        let url = format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            self.endpoint.scheme(),
            host,
            canonical_uri,
            canonical_query,
            signature
        );

        Ok(SignedUrl {
            url,
            expires_at: request.expires_at,
        })
    }

    fn host_and_path(&self, request: &SignedUrlRequest) -> Result<(String, String)> {
        let base_host = self
            .endpoint
            .host_str()
            .ok_or_else(|| Error::InvalidConfig("No host in storage endpoint".into()))?;
        let authority = match self.endpoint.port() {
            Some(port) => format!("{}:{}", base_host, port),
            None => base_host.to_string(),
        };

        if self.path_style {
            Ok((
                authority,
                format!(
                    "/{}/{}",
                    uri_encode(&request.bucket, false),
                    uri_encode(&request.key, false)
                ),
            ))
        } else {
            Ok((
                format!("{}.{}", request.bucket, authority),
                format!("/{}", uri_encode(&request.key, false)),
            ))
        }
    }

    fn signature(&self, date_stamp: &str, string_to_sign: &str) -> String {
        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

#[async_trait]
impl UrlSigner for OfflineSigner {
    async fn signed_read_url(&self, request: &SignedUrlRequest) -> Result<SignedUrl> {
        self.sign_at(request, Utc::now())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 encoding as SigV4 expects; `/` is kept in object paths
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut result = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char)
            }
            b'/' if !encode_slash => result.push('/'),
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
