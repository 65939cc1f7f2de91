//! Notification publisher for Alarmcast
//!
//! Opens a fresh MQTT-over-TLS connection per notification, publishes one
//! message, and closes the connection on every exit path. The whole
//! exchange is bounded by the configured deadline.

pub mod endpoint;
pub mod publisher;
pub mod session;
pub mod tls;

pub use endpoint::BrokerEndpoint;
pub use publisher::{PublishReceipt, PublishState, Publisher, Settlement};
pub use session::{BrokerConnector, BrokerEvent, BrokerSession, RumqttcConnector};
