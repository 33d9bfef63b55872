//! TLS trust policies and session metadata capture.
//!
//! # Design
//! A `TrustPolicy` is turned into a complete rustls `ClientConfig` before
//! the `ClientConnection` is created, so an override can never be installed
//! after the first handshake byte. The platform-store config is built once
//! per process; `AcceptAll` and `Custom` configs are cheap and built per
//! connection.

use std::fmt;
use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::RequestError;

/// How the peer certificate chain of an `https` request is validated.
#[derive(Clone, Default)]
pub enum TrustPolicy {
    /// Platform trust store.
    #[default]
    Default,
    /// Accept every certificate and host name. Only for test rigs and
    /// self-signed development servers.
    AcceptAll,
    /// Caller-supplied verifier.
    Custom(Arc<dyn ServerCertVerifier>),
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustPolicy::Default => f.write_str("Default"),
            TrustPolicy::AcceptAll => f.write_str("AcceptAll"),
            TrustPolicy::Custom(verifier) => f.debug_tuple("Custom").field(verifier).finish(),
        }
    }
}

impl TrustPolicy {
    pub fn custom(verifier: impl ServerCertVerifier + 'static) -> Self {
        TrustPolicy::Custom(Arc::new(verifier))
    }

    /// Build the rustls configuration for this policy.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, RequestError> {
        match self {
            TrustPolicy::Default => {
                static PLATFORM: OnceLock<Arc<ClientConfig>> = OnceLock::new();
                if let Some(config) = PLATFORM.get() {
                    return Ok(config.clone());
                }
                let config = Arc::new(
                    config_builder()?
                        .with_root_certificates(platform_roots())
                        .with_no_client_auth(),
                );
                Ok(PLATFORM.get_or_init(|| config).clone())
            }
            TrustPolicy::AcceptAll => {
                let verifier = AcceptAllVerifier::new(&crypto_provider());
                Ok(Arc::new(
                    config_builder()?
                        .dangerous()
                        .with_custom_certificate_verifier(Arc::new(verifier))
                        .with_no_client_auth(),
                ))
            }
            TrustPolicy::Custom(verifier) => Ok(Arc::new(
                config_builder()?
                    .dangerous()
                    .with_custom_certificate_verifier(verifier.clone())
                    .with_no_client_auth(),
            )),
        }
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn config_builder() -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, RequestError> {
    ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| RequestError::transport("tls config", e))
}

fn platform_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::debug!("errors loading native certs: {:?}", native.errors);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "loaded platform trust store");
    roots
}

/// Verifier that accepts any chain, any host name and any signature.
#[derive(Debug)]
struct AcceptAllVerifier {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAllVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            schemes: provider.signature_verification_algorithms.supported_schemes(),
        }
    }
}

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Negotiated cipher suite name, e.g. `TLS13_AES_128_GCM_SHA256`.
pub(crate) fn cipher_suite(conn: &ClientConnection) -> Option<String> {
    conn.negotiated_cipher_suite()
        .map(|suite| format!("{:?}", suite.suite()))
}

/// Peer chain as DER bytes, leaf first.
pub(crate) fn peer_chain(conn: &ClientConnection) -> Option<Vec<Vec<u8>>> {
    conn.peer_certificates()
        .filter(|certs| !certs.is_empty())
        .map(|certs| certs.iter().map(|cert| cert.as_ref().to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_platform_store() {
        assert!(matches!(TrustPolicy::default(), TrustPolicy::Default));
        assert_eq!(format!("{:?}", TrustPolicy::default()), "Default");
    }

    #[test]
    fn every_policy_builds_a_config() {
        assert!(TrustPolicy::Default.client_config().is_ok());
        assert!(TrustPolicy::AcceptAll.client_config().is_ok());
        let verifier = AcceptAllVerifier::new(&crypto_provider());
        let custom = TrustPolicy::custom(verifier);
        assert!(custom.client_config().is_ok());
        assert!(format!("{custom:?}").starts_with("Custom("));
    }

    #[test]
    fn platform_config_is_shared() {
        let a = TrustPolicy::Default.client_config().unwrap();
        let b = TrustPolicy::Default.client_config().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn accept_all_accepts_garbage() {
        let verifier = AcceptAllVerifier::new(&crypto_provider());
        let cert = CertificateDer::from(vec![0u8; 8]);
        let name = ServerName::try_from("example.invalid").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
