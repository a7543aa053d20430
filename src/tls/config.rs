//! TLS client and server settings.

use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::{RootCertStore, SupportedProtocolVersion};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::warn;

use crate::error::{DoipError, Result};
use crate::tls::cipher::{CipherSuite, REGISTRY, TlsVersion};

/// Client side TLS settings.
#[derive(Clone)]
pub struct TlsClientConfig {
    /// Trust anchors for server certificate validation.
    pub root_certificates: Vec<CertificateDer<'static>>,
    /// Offered suites, highest priority first.
    pub cipher_suites: Vec<CipherSuite>,
    /// Name checked against the server certificate; the peer IP when `None`.
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    /// Create settings trusting `root_certificates` and offering the whole registry.
    pub fn new(root_certificates: Vec<CertificateDer<'static>>) -> Self {
        Self {
            root_certificates,
            cipher_suites: REGISTRY.to_vec(),
            server_name: None,
        }
    }

    /// Load trust anchors from a PEM file.
    pub fn from_ca_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let certs = CertificateDer::pem_file_iter(path)
            .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
            .map_err(|e| {
                DoipError::invalid_parameter(format!("cannot read {}: {e}", path.display()))
            })?;
        if certs.is_empty() {
            return Err(DoipError::invalid_parameter(format!(
                "no certificates in {}",
                path.display()
            )));
        }
        Ok(Self::new(certs))
    }

    /// Restrict the offered suites.
    pub fn with_cipher_suites(mut self, suites: impl Into<Vec<CipherSuite>>) -> Self {
        self.cipher_suites = suites.into();
        self
    }

    /// Set the name checked against the server certificate.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Build the rustls client configuration.
    pub fn build(&self) -> Result<Arc<rustls::ClientConfig>> {
        let (provider, versions) = provider_for(&self.cipher_suites)?;

        let mut roots = RootCertStore::empty();
        for cert in &self.root_certificates {
            roots
                .add(cert.clone())
                .map_err(|e| DoipError::invalid_parameter(format!("bad trust anchor: {e}")))?;
        }

        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| DoipError::UnsupportedCipherSuite(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

impl std::fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("root_certificates", &self.root_certificates.len())
            .field("cipher_suites", &self.cipher_suites)
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Server side TLS settings.
pub struct TlsServerConfig {
    /// Certificate chain presented to clients.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key of the leaf certificate.
    pub private_key: PrivateKeyDer<'static>,
    /// Accepted suites.
    pub cipher_suites: Vec<CipherSuite>,
}

impl TlsServerConfig {
    /// Create settings accepting the whole registry.
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, private_key: PrivateKeyDer<'static>) -> Self {
        Self {
            cert_chain,
            private_key,
            cipher_suites: REGISTRY.to_vec(),
        }
    }

    /// Restrict the accepted suites.
    pub fn with_cipher_suites(mut self, suites: impl Into<Vec<CipherSuite>>) -> Self {
        self.cipher_suites = suites.into();
        self
    }

    /// Build the rustls server configuration.
    pub fn build(&self) -> Result<Arc<rustls::ServerConfig>> {
        let (provider, versions) = provider_for(&self.cipher_suites)?;

        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| DoipError::UnsupportedCipherSuite(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.private_key.clone_key())
            .map_err(|e| DoipError::invalid_parameter(format!("bad server certificate: {e}")))?;
        Ok(Arc::new(config))
    }
}

impl Clone for TlsServerConfig {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
            cipher_suites: self.cipher_suites.clone(),
        }
    }
}

impl std::fmt::Debug for TlsServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServerConfig")
            .field("cert_chain", &self.cert_chain.len())
            .field("cipher_suites", &self.cipher_suites)
            .finish_non_exhaustive()
    }
}

/// Crypto provider restricted to `suites`, plus the protocol versions they need.
fn provider_for(
    suites: &[CipherSuite],
) -> Result<(Arc<CryptoProvider>, Vec<&'static SupportedProtocolVersion>)> {
    let mut selected = Vec::new();
    let mut unsupported = Vec::new();
    for suite in suites {
        match suite.rustls_suite() {
            Some(backend) => selected.push(backend),
            None => unsupported.push(suite.name()),
        }
    }

    if selected.is_empty() {
        let detail = if unsupported.is_empty() {
            "no cipher suites configured".to_string()
        } else {
            unsupported.join(", ")
        };
        return Err(DoipError::UnsupportedCipherSuite(detail));
    }
    if !unsupported.is_empty() {
        warn!(skipped = ?unsupported, "Cipher suites not provided by the TLS backend");
    }

    let mut versions = Vec::new();
    if suites.iter().any(|s| s.is_supported() && s.version() == TlsVersion::Tls13) {
        versions.push(&rustls::version::TLS13);
    }
    if suites.iter().any(|s| s.is_supported() && s.version() == TlsVersion::Tls12) {
        versions.push(&rustls::version::TLS12);
    }

    let provider = CryptoProvider {
        cipher_suites: selected,
        ..rustls::crypto::ring::default_provider()
    };
    Ok((Arc::new(provider), versions))
}
