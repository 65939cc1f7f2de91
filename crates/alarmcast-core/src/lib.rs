//! Alarmcast Core Library
//!
//! Core types, configuration, and the error taxonomy shared by the
//! alarmcast notifier crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrokerSettings, NotifierConfig, QosLevel};
pub use error::{Error, Result};

/// Alarmcast version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Objects outside this prefix never produce a notification
pub const AUDIO_PREFIX: &str = "audio/";

/// Topic used when none is configured
pub const DEFAULT_TOPIC: &str = "home/audio/device1";

/// Default port for MQTT over TLS
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Lifetime of the signed URL embedded in a notification (10 minutes)
pub const SIGNED_URL_TTL_SECS: u64 = 10 * 60;

/// Default publish deadline
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;

/// Bounds accepted for the publish deadline
pub const MIN_PUBLISH_TIMEOUT_SECS: u64 = 10;
pub const MAX_PUBLISH_TIMEOUT_SECS: u64 = 15;

/// Default S3 region
pub const DEFAULT_REGION: &str = "us-east-1";
