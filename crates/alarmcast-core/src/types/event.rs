//! Upload events and the trigger payloads they arrive in
//!
//! Two delivery shapes are understood:
//! - S3-compatible event notifications (`{"Records": [...]}`)
//! - Cloud Storage object resources (`{"bucket": "...", "name": "..."}`)

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A finalized object, as seen by the upload handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub bucket: String,
    pub path: String,
}

impl UploadEvent {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Reject events the storage system would never emit
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::InvalidEvent("bucket name is empty".into()));
        }
        if self.path.is_empty() {
            return Err(Error::InvalidEvent("object path is empty".into()));
        }
        Ok(())
    }
}

// ============================================================================
// S3-compatible notification message
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventMessage {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3BucketEntity,
    pub object: S3ObjectEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3ObjectEntity {
    /// URL-encoded object key
    pub key: String,
}

impl S3EventRecord {
    /// `ObjectCreated:*` is the S3 counterpart of a finalization event.
    /// Event names arrive with or without the `s3:` prefix.
    pub fn is_object_created(&self) -> bool {
        self.event_name
            .trim_start_matches("s3:")
            .starts_with("ObjectCreated:")
    }

    pub fn to_upload_event(&self) -> Result<UploadEvent> {
        let path = decode_s3_key(&self.s3.object.key)?;
        let event = UploadEvent::new(self.s3.bucket.name.clone(), path);
        event.validate()?;
        Ok(event)
    }
}

/// Keys in S3 notifications are form-encoded: `+` stands for a space
fn decode_s3_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .map_err(|e| Error::InvalidEvent(format!("undecodable object key {:?}: {}", raw, e)))
}

// ============================================================================
// Cloud Storage object resource
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StorageObject {
    pub bucket: String,
    pub name: String,
}

// ============================================================================
// Trigger payload
// ============================================================================

/// Body delivered by a storage trigger
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TriggerPayload {
    S3(S3EventMessage),
    Object(StorageObject),
}

impl TriggerPayload {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::InvalidEvent(e.to_string()))
    }

    /// Finalization events carried by this payload, in delivery order.
    /// Non-creation S3 records are dropped.
    pub fn upload_events(&self) -> Result<Vec<UploadEvent>> {
        match self {
            TriggerPayload::S3(message) => message
                .records
                .iter()
                .filter(|r| r.is_object_created())
                .map(S3EventRecord::to_upload_event)
                .collect(),
            TriggerPayload::Object(object) => {
                let event = UploadEvent::new(object.bucket.clone(), object.name.clone());
                event.validate()?;
                Ok(vec![event])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_notification() {
        let body = br#"{
            "Records": [
                {
                    "eventVersion": "2.1",
                    "eventSource": "aws:s3",
                    "eventName": "ObjectCreated:Put",
                    "s3": {
                        "bucket": {"name": "remote-alarm"},
                        "object": {"key": "audio/morning+alarm%281%29.mp3", "size": 1024}
                    }
                },
                {
                    "eventName": "s3:ObjectRemoved:Delete",
                    "s3": {
                        "bucket": {"name": "remote-alarm"},
                        "object": {"key": "audio/old.mp3"}
                    }
                }
            ]
        }"#;

        let payload = TriggerPayload::from_json(body).unwrap();
        let events = payload.upload_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bucket, "remote-alarm");
        assert_eq!(events[0].path, "audio/morning alarm(1).mp3");
    }

    #[test]
    fn test_parse_storage_object() {
        let body = br#"{"bucket": "remote-alarm", "name": "audio/alarm1.mp3", "size": "2048"}"#;
        let payload = TriggerPayload::from_json(body).unwrap();
        assert!(matches!(payload, TriggerPayload::Object(_)));
        assert_eq!(
            payload.upload_events().unwrap(),
            vec![UploadEvent::new("remote-alarm", "audio/alarm1.mp3")]
        );
    }

    #[test]
    fn test_prefixed_event_name() {
        let body = br#"{"Records":[{"eventName":"s3:ObjectCreated:CompleteMultipartUpload",
            "s3":{"bucket":{"name":"b"},"object":{"key":"audio/long.wav"}}}]}"#;
        let events = TriggerPayload::from_json(body).unwrap().upload_events().unwrap();
        assert_eq!(events, vec![UploadEvent::new("b", "audio/long.wav")]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let body = br#"{"bucket": "b", "name": ""}"#;
        let payload = TriggerPayload::from_json(body).unwrap();
        assert!(matches!(
            payload.upload_events(),
            Err(Error::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            TriggerPayload::from_json(b"{\"hello\": 1}"),
            Err(Error::InvalidEvent(_))
        ));
        assert!(TriggerPayload::from_json(b"not json").is_err());
    }
}
