//! Configuration for Alarmcast
//!
//! Values are layered: defaults, then an optional TOML file, then the
//! environment. The handler and publisher never read the environment
//! themselves; they receive the resolved sections below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NotifierConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay values from the process environment
    pub fn apply_env(&mut self) {
        let _ = self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored;
    /// unparseable ones are logged and their keys returned.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut rejected = Vec::new();
        let mut reject = |key: &'static str, value: &str| {
            warn!(key, value, "Ignoring invalid environment value");
            rejected.push(key);
        };

        // Broker
        if let Some(url) = get("MQTT_BROKER_URL") {
            self.broker.url = url;
        }
        if let Some(username) = get("MQTT_USERNAME") {
            self.broker.username = username;
        }
        if let Some(password) = get("MQTT_PASSWORD") {
            self.broker.password = password;
        }
        if let Some(topic) = get("MQTT_DEVICE_TOPIC") {
            self.broker.topic = topic;
        }
        if let Some(raw) = get("ALARMCAST_MQTT_QOS") {
            match raw.trim().parse::<u8>().ok().map(QosLevel::try_from) {
                Some(Ok(qos)) => self.broker.qos = qos,
                _ => reject("ALARMCAST_MQTT_QOS", &raw),
            }
        }
        if let Some(raw) = get("ALARMCAST_PUBLISH_TIMEOUT_SECS") {
            match raw.trim().parse() {
                Ok(secs) => self.broker.timeout_secs = secs,
                Err(_) => reject("ALARMCAST_PUBLISH_TIMEOUT_SECS", &raw),
            }
        }
        if let Some(ca) = get("ALARMCAST_MQTT_CA_FILE") {
            self.broker.ca_file = Some(PathBuf::from(ca));
        }

        // Trigger
        if let Some(bucket) = get("ALARMCAST_BUCKET") {
            self.trigger.bucket = Some(bucket);
        }

        // Storage
        if let Some(signer) = get("ALARMCAST_SIGNER") {
            match signer.to_lowercase().as_str() {
                "offline" => self.storage.signer = SignerKind::Offline,
                "sdk" => self.storage.signer = SignerKind::Sdk,
                _ => reject("ALARMCAST_SIGNER", &signer),
            }
        }
        if let Some(endpoint) = get("ALARMCAST_S3_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
        }
        if let Some(region) = get("ALARMCAST_S3_REGION") {
            self.storage.region = region;
        }
        if let Some(key) = get("ALARMCAST_S3_ACCESS_KEY") {
            self.storage.access_key = Some(key);
        }
        if let Some(secret) = get("ALARMCAST_S3_SECRET_KEY") {
            self.storage.secret_key = Some(secret);
        }

        // Server
        if let Some(addr) = get("ALARMCAST_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(port) = get("ALARMCAST_PORT") {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => reject("ALARMCAST_PORT", &port),
            }
        }

        // Logging
        if let Some(level) = get("ALARMCAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = get("ALARMCAST_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                _ => reject("ALARMCAST_LOG_FORMAT", &format),
            }
        }

        rejected
    }

    /// Check values whose bounds are fixed regardless of deployment.
    /// Missing broker credentials are not reported here; the publisher
    /// owns that precondition.
    pub fn validate(&self) -> crate::Result<()> {
        let timeout = self.broker.timeout_secs;
        if !(crate::MIN_PUBLISH_TIMEOUT_SECS..=crate::MAX_PUBLISH_TIMEOUT_SECS).contains(&timeout)
        {
            return Err(crate::Error::InvalidConfig(format!(
                "broker.timeout_secs must be between {} and {}, got {}",
                crate::MIN_PUBLISH_TIMEOUT_SECS,
                crate::MAX_PUBLISH_TIMEOUT_SECS,
                timeout
            )));
        }

        self.broker_settings().check_identity()?;

        if self.storage.url_expiry_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "storage.url_expiry_secs must be positive".into(),
            ));
        }

        if let Some(ref ca) = self.broker.ca_file {
            if !ca.exists() {
                return Err(crate::Error::InvalidConfig(format!(
                    "CA bundle not found: {:?}",
                    ca
                )));
            }
        }

        if self.storage.signer == SignerKind::Offline
            && (self.storage.endpoint.is_none()
                || self.storage.access_key.is_none()
                || self.storage.secret_key.is_none())
        {
            return Err(crate::Error::InvalidConfig(
                "offline signer requires storage.endpoint, access_key and secret_key".into(),
            ));
        }

        Ok(())
    }

    /// Resolve the owned settings handed to one publisher invocation
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            url: self.broker.url.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            topic: self.broker.topic.clone(),
            qos: self.broker.qos,
            timeout: Duration::from_secs(self.broker.timeout_secs),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            ca_file: self.broker.ca_file.clone(),
            client_id_prefix: self.broker.client_id_prefix.clone(),
        }
    }
}

/// Which uploads reach the handler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Bucket the trigger is registered on; other buckets are ignored
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    /// Sign locally from static credentials, no network call
    Offline,
    /// Use the AWS SDK credential chain and check the object exists
    Sdk,
}

impl Default for SignerKind {
    fn default() -> Self {
        Self::Sdk
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub signer: SignerKind,
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_true")]
    pub path_style: bool,
    #[serde(default = "default_url_expiry")]
    pub url_expiry_secs: u64,
    #[serde(default = "default_true")]
    pub verify_exists: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            signer: SignerKind::default(),
            endpoint: None,
            region: default_region(),
            access_key: None,
            secret_key: None,
            path_style: true,
            url_expiry_secs: crate::SIGNED_URL_TTL_SECS,
            verify_exists: true,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("signer", &self.signer)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .field("url_expiry_secs", &self.url_expiry_secs)
            .field("verify_exists", &self.verify_exists)
            .finish()
    }
}

/// MQTT quality of service supported by the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
}

impl Default for QosLevel {
    fn default() -> Self {
        Self::AtLeastOnce
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(format!("unsupported QoS level: {}", other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub qos: QosLevel,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// PEM bundle replacing the platform trust roots
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            topic: default_topic(),
            qos: QosLevel::default(),
            timeout_secs: default_timeout(),
            keep_alive_secs: default_keep_alive(),
            ca_file: None,
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("timeout_secs", &self.timeout_secs)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("ca_file", &self.ca_file)
            .field("client_id_prefix", &self.client_id_prefix)
            .finish()
    }
}

/// Broker values resolved for a single publish
#[derive(Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub topic: String,
    pub qos: QosLevel,
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub ca_file: Option<PathBuf>,
    pub client_id_prefix: String,
}

impl BrokerSettings {
    /// Fail with `ConfigMissing` when the URL or a credential is empty
    pub fn validate(&self) -> crate::Result<()> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("broker.url");
        }
        if self.username.is_empty() {
            missing.push("broker.username");
        }
        if self.password.is_empty() {
            missing.push("broker.password");
        }

        if !missing.is_empty() {
            return Err(crate::Error::ConfigMissing { missing });
        }
        self.check_identity()
    }

    /// Topic and client id shape, checked before any client is built
    pub fn check_identity(&self) -> crate::Result<()> {
        if self.topic.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("broker.topic must not be empty".into()));
        }
        if self.topic.contains(['+', '#']) {
            return Err(crate::Error::InvalidConfig(format!(
                "broker.topic must not contain wildcards, got {:?}",
                self.topic
            )));
        }
        if self.client_id_prefix.is_empty()
            || self.client_id_prefix.starts_with(char::is_whitespace)
        {
            return Err(crate::Error::InvalidConfig(format!(
                "broker.client_id_prefix must be non-empty and not start with whitespace, got {:?}",
                self.client_id_prefix
            )));
        }
        Ok(())
    }

    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn has_username(&self) -> bool {
        !self.username.is_empty()
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn default_region() -> String {
    crate::DEFAULT_REGION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_url_expiry() -> u64 {
    crate::SIGNED_URL_TTL_SECS
}

fn default_topic() -> String {
    crate::DEFAULT_TOPIC.to_string()
}

fn default_timeout() -> u64 {
    crate::DEFAULT_PUBLISH_TIMEOUT_SECS
}

fn default_keep_alive() -> u64 {
    30
}

fn default_client_id_prefix() -> String {
    "alarmcast".to_string()
}
