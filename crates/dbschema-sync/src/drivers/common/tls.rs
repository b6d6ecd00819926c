//! TLS setup for PostgreSQL sessions.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// PostgreSQL `sslmode` values understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypt without verifying the server certificate.
    Require,
    /// Verify the certificate chain.
    VerifyCa,
    /// Verify the certificate chain and host name.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Builds the rustls connector for a given [`SslMode`].
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// Connector for `tokio_postgres::Config::connect`; `None` when TLS is off.
    pub fn connector(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.client_config()?)))
    }

    fn client_config(&self) -> Result<ClientConfig> {
        match self.ssl_mode {
            SslMode::Disable => Err(MigrateError::Config(
                "Cannot build TLS config for ssl_mode=disable".into(),
            )),
            SslMode::Require => {
                warn!(
                    "ssl_mode=require encrypts the session but does NOT verify the server \
                     certificate; use verify-full outside trusted networks"
                );
                Ok(ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                    .with_no_client_auth())
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                if self.ssl_mode == SslMode::VerifyCa {
                    warn!("ssl_mode=verify-ca also checks the host name with rustls");
                } else {
                    info!("ssl_mode=verify-full: certificate and host name verified");
                }
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                Ok(ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth())
            }
        }
    }
}

/// Verifier used by `ssl_mode=require`.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("REQUIRE").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify-ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("verify-full").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Disable);
        assert!(SslMode::parse("prefer").is_err());
    }

    #[test]
    fn test_disable_has_no_connector() {
        assert!(TlsBuilder::new(SslMode::Disable).connector().unwrap().is_none());
    }

    #[test]
    fn test_require_builds_connector() {
        assert!(TlsBuilder::new(SslMode::Require).connector().unwrap().is_some());
    }
}
