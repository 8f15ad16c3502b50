//! Mutual-TLS configuration from PEM files.
//!
//! Both sides of a connection load the same `(ca, cert, key)` triple: the
//! listener requires client certificates chained to the CA, and the dialer
//! verifies the server against that CA while presenting its own certificate.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::CommError;

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, CommError> {
    let pem = std::fs::read(path).map_err(|e| {
        CommError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read certificate '{path}': {e}"),
        ))
    })?;
    rustls_pemfile::certs(&mut &*pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CommError::Tls(format!("failed to parse certificate '{path}': {e}")))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, CommError> {
    let pem = std::fs::read(path).map_err(|e| {
        CommError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read private key '{path}': {e}"),
        ))
    })?;
    rustls_pemfile::private_key(&mut &*pem)
        .map_err(|e| CommError::Tls(format!("failed to parse private key '{path}': {e}")))?
        .ok_or_else(|| CommError::Tls(format!("no private key found in '{path}'")))
}

fn root_store(ca: &str) -> Result<RootCertStore, CommError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca)? {
        roots
            .add(cert)
            .map_err(|e| CommError::Tls(format!("failed to add CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Build a server-side TLS config that requires client certificates.
pub(crate) fn server_config(ca: &str, cert: &str, key: &str) -> Result<Arc<ServerConfig>, CommError> {
    let roots = root_store(ca)?;
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .map_err(|e| CommError::Tls(format!("failed to build client verifier: {e}")))?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CommError::Tls(format!("failed to configure TLS: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(cert)?, load_private_key(key)?)
        .map_err(|e| CommError::Tls(format!("failed to configure server certificate: {e}")))?;

    Ok(Arc::new(config))
}

/// Build a client-side TLS config that presents a client certificate.
pub(crate) fn client_config(ca: &str, cert: &str, key: &str) -> Result<Arc<ClientConfig>, CommError> {
    let roots = root_store(ca)?;

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CommError::Tls(format!("failed to configure TLS: {e}")))?
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
        .map_err(|e| CommError::Tls(format!("failed to configure client certificate: {e}")))?;

    Ok(Arc::new(config))
}
