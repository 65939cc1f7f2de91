//! TLS setup for the broker connection
//!
//! Server certificates are always verified: either against the platform
//! trust roots or against a configured CA bundle.

use alarmcast_core::{Error, Result};
use rumqttc::TlsConfiguration;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

/// Build the client TLS configuration
pub fn client_tls(ca_file: Option<&Path>) -> Result<TlsConfiguration> {
    match ca_file {
        Some(path) => {
            let ca = load_ca_bundle(path)?;
            Ok(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            })
        }
        None => Ok(TlsConfiguration::default()),
    }
}

/// Read a PEM bundle and make sure it holds at least one certificate
pub fn load_ca_bundle(path: &Path) -> Result<Vec<u8>> {
    let mut pem = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut pem))
        .map_err(|e| Error::InvalidConfig(format!("Failed to read CA bundle {:?}: {}", path, e)))?;

    let count = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidConfig(format!("Failed to parse CA bundle {:?}: {}", path, e)))?
        .len();

    if count == 0 {
        return Err(Error::InvalidConfig(format!(
            "No certificates found in {:?}",
            path
        )));
    }

    info!("Loaded {} CA certificate(s) from {:?}", count, path);
    Ok(pem)
}
