//! Error types for Alarmcast

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Object store errors
    #[error("The specified key does not exist: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("Access denied while signing {bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Signed URL generation failed: {0}")]
    UrlGeneration(String),

    // Configuration errors
    #[error("Broker configuration missing: {}", missing.join(", "))]
    ConfigMissing { missing: Vec<&'static str> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Broker errors
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Broker rejected publish: {0}")]
    Publish(String),

    #[error("Broker did not settle the publish within {0:?}")]
    Timeout(Duration),

    // Input errors
    #[error("Invalid trigger event: {0}")]
    InvalidEvent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoSuchKey { .. } => "NoSuchKey",
            Error::AccessDenied { .. } => "AccessDenied",
            Error::UrlGeneration(_) => "UrlGenerationFailure",
            Error::ConfigMissing { .. } => "ConfigMissing",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::Connection(_) => "ConnectionFailure",
            Error::Publish(_) => "PublishFailure",
            Error::Timeout(_) => "TimeoutFailure",
            Error::InvalidEvent(_) => "InvalidEvent",
            Error::Serialization(_) => "SerializationFailure",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Status reported to an HTTP trigger so the sender can decide on retries
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidEvent(_) | Error::Serialization(_) => 400,

            Error::NoSuchKey { .. } => 404,

            Error::AccessDenied { .. } => 403,

            Error::Connection(_) | Error::Publish(_) | Error::UrlGeneration(_) => 502,

            Error::Timeout(_) => 504,

            _ => 500,
        }
    }

    /// Failures raised by the object-store collaborator
    pub fn is_url_generation(&self) -> bool {
        matches!(
            self,
            Error::NoSuchKey { .. } | Error::AccessDenied { .. } | Error::UrlGeneration(_)
        )
    }
}
