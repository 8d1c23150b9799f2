//! rustls adapter for the pinning decision.
//!
//! [`PinnedServerVerifier`] replaces chain-of-trust validation entirely: a
//! connection is accepted if and only if the validator accepts the presented
//! server trust. Handshake signature checks still run through the crypto
//! provider's standard routines, so a peer must actually hold the pinned key,
//! not merely present its certificate.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::validator::{AuthenticationChallenge, CertificateValidator, ChallengeDisposition, ServerTrust};

/// `ServerCertVerifier` that applies the pin-or-reject decision to every
/// handshake on the session.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    validator: CertificateValidator,
    provider: Arc<CryptoProvider>,
}

impl PinnedServerVerifier {
    #[must_use]
    pub fn new(validator: CertificateValidator, provider: Arc<CryptoProvider>) -> Self {
        Self {
            validator,
            provider,
        }
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let host = server_name.to_str();
        let chain: Vec<Vec<u8>> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|certificate| certificate.as_ref().to_vec())
            .collect();
        let challenge = AuthenticationChallenge::ServerTrust(ServerTrust {
            host: &host,
            chain: &chain,
        });

        match self.validator.evaluate(&challenge) {
            ChallengeDisposition::UseCredential(_) => Ok(ServerCertVerified::assertion()),
            ChallengeDisposition::RejectProtectionSpace
            | ChallengeDisposition::PerformDefaultHandling => Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a rustls client configuration with pinning as the only certificate
/// validation, suitable for handing to an HTTP client.
pub fn pinned_client_config(
    validator: CertificateValidator,
) -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(PinnedServerVerifier::new(validator, provider.clone()));
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}
