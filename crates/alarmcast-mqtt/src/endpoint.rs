//! Broker URL parsing

use alarmcast_core::{Error, Result, DEFAULT_MQTTS_PORT};
use tracing::warn;
use url::Url;

/// Host and port of the broker. The transport is always TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    /// Accepts `mqtts://`, `ssl://`, `tls://`, a bare `host[:port]`, and the
    /// plaintext spellings `mqtt://` / `tcp://`, which are still dialed over
    /// TLS. Websocket and other schemes are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("mqtts://{}", raw)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::InvalidConfig(format!("Invalid broker URL {:?}: {}", raw, e)))?;

        match url.scheme() {
            "mqtts" | "ssl" | "tls" => {}
            "mqtt" | "tcp" => {
                warn!(scheme = url.scheme(), "Plaintext broker scheme requested, dialing over TLS");
            }
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unsupported broker scheme: {}",
                    other
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidConfig(format!("No host in broker URL {:?}", raw)))?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_MQTTS_PORT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        let endpoint = BrokerEndpoint::parse("mqtts://abc123.s1.eu.hivemq.cloud").unwrap();
        assert_eq!(endpoint.host, "abc123.s1.eu.hivemq.cloud");
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn test_explicit_port() {
        let endpoint = BrokerEndpoint::parse("ssl://broker.example.com:9883").unwrap();
        assert_eq!(endpoint.port, 9883);
    }

    #[test]
    fn test_bare_host() {
        assert_eq!(
            BrokerEndpoint::parse("broker.example.com").unwrap(),
            BrokerEndpoint {
                host: "broker.example.com".into(),
                port: 8883
            }
        );
        assert_eq!(
            BrokerEndpoint::parse("broker.example.com:8884").unwrap().port,
            8884
        );
    }

    #[test]
    fn test_plaintext_scheme_keeps_secure_port() {
        let endpoint = BrokerEndpoint::parse("mqtt://broker.example.com").unwrap();
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn test_rejected_schemes() {
        assert!(BrokerEndpoint::parse("wss://broker.example.com/mqtt").is_err());
        assert!(BrokerEndpoint::parse("http://broker.example.com").is_err());
        assert!(BrokerEndpoint::parse("mqtts://").is_err());
    }
}
