//! TLS endpoint probing
//!
//! A probe dials `fqdn:443`, completes a TLS handshake with SNI set to the
//! FQDN, and fingerprints the leaf certificate: base64 of SHA-256 over the
//! DER encoding of the SubjectPublicKeyInfo. Certificate chains are
//! validated against the Mozilla root program (`webpki-roots`), matching
//! what a pinning client's platform verifier would accept.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rustls::pki_types::ServerName;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

/// Errors from one probe attempt; recorded as the record's `last_error`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid server name: {0}")]
    ServerName(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("tls handshake failed: {0}")]
    Handshake(String),

    #[error("no peer certificate presented")]
    NoPeerCertificate,

    #[error("failed to parse certificate: {0}")]
    Certificate(String),
}

/// What a successful probe yields: the pin and the seconds left on the
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub key: String,
    pub expire: i64,
}

impl Observation {
    /// Fingerprint a leaf certificate in DER form.
    pub fn from_der(der: &[u8]) -> Result<Self, ProbeError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|err| ProbeError::Certificate(err.to_string()))?;

        let hash = Sha256::digest(cert.public_key().raw);
        let key = STANDARD.encode(hash);

        let expire = cert.validity().not_after.timestamp() - Utc::now().timestamp();

        Ok(Self { key, expire })
    }
}

/// Reusable TLS prober; the client config (root store, provider) is built
/// once and shared across every worker.
#[derive(Clone)]
pub struct Prober {
    connector: TlsConnector,
    timeout: Duration,
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
        }
    }

    /// Probe one FQDN on port 443. Both the TCP connect and the handshake
    /// are bounded by the configured timeout.
    pub async fn probe(&self, fqdn: &str) -> Result<Observation, ProbeError> {
        let server_name = ServerName::try_from(fqdn.to_string())
            .map_err(|err| ProbeError::ServerName(err.to_string()))?;

        let stream = timeout(self.timeout, TcpStream::connect((fqdn, 443)))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|err| ProbeError::Connect(err.to_string()))?;

        let tls = timeout(self.timeout, self.connector.connect(server_name, stream))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|err| ProbeError::Handshake(err.to_string()))?;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or(ProbeError::NoPeerCertificate)?;

        Observation::from_der(leaf.as_ref())
    }
}
