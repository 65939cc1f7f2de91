//! Notification payload published to the device
//!
//! Wire contract: a JSON object with exactly three string fields,
//! `file_url`, `timestamp` (ISO-8601) and `filename`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationPayload {
    /// Signed, time-limited read URL
    pub file_url: String,
    /// Generation time
    pub timestamp: String,
    /// Final segment of the object path
    pub filename: String,
}

impl NotificationPayload {
    pub fn new(file_url: impl Into<String>, generated_at: DateTime<Utc>, path: &str) -> Self {
        Self {
            file_url: file_url.into(),
            timestamp: iso8601(generated_at),
            filename: filename_of(path).to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Parse the timestamp back; used to validate received payloads
    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Text after the last `/` of an object path
pub fn filename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// UTC timestamp with millisecond precision, e.g. `2024-05-01T06:30:00.000Z`
pub fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
