//! TLS support for the spamd connection

use anyhow::{anyhow, Result};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use spamgate_common::config::SpamdTlsConfig;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::info;

/// Load the trusted CA bundle and create a connector
pub fn create_tls_connector(tls_config: &SpamdTlsConfig) -> Result<TlsConnector> {
    let ca_file = File::open(&tls_config.ca_path)
        .map_err(|e| anyhow!("Failed to open CA file: {}", e))?;
    let mut ca_reader = BufReader::new(ca_file);
    let ca_certs: Vec<CertificateDer<'static>> = certs(&mut ca_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Failed to parse CA certificates: {}", e))?;

    if ca_certs.is_empty() {
        return Err(anyhow!("No certificates found in CA file"));
    }

    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|e| anyhow!("Failed to add CA certificate: {}", e))?;
    }

    info!("Loaded {} CA certificate(s) for spamd", roots.len());

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Name the server certificate is verified against
pub fn server_name(tls_config: &SpamdTlsConfig, host: &str) -> Result<ServerName<'static>> {
    let name = tls_config.server_name.as_deref().unwrap_or(host);
    ServerName::try_from(name)
        .map(|n| n.to_owned())
        .map_err(|e| anyhow!("Invalid TLS server name {}: {}", name, e))
}
