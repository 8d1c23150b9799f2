//! Server-trust challenge evaluation.

use x509_parser::prelude::{FromDer, X509Certificate};

use crate::store::PinStore;

/// An authentication challenge delivered during a transport handshake.
#[derive(Debug)]
pub enum AuthenticationChallenge<'a> {
    /// The transport is asking whether to trust the server's certificate
    /// chain. This is the only method the pinning logic handles.
    ServerTrust(ServerTrust<'a>),
    /// Any other authentication method (HTTP basic, digest, client
    /// certificate, ...). Pinning never touches these.
    Other,
}

/// The live server trust presented in a challenge: the host the connection is
/// addressed to and the certificate chain offered by the server, leaf first,
/// in DER form.
#[derive(Debug)]
pub struct ServerTrust<'a> {
    pub host: &'a str,
    pub chain: &'a [Vec<u8>],
}

impl ServerTrust<'_> {
    #[must_use]
    pub fn leaf(&self) -> Option<&[u8]> {
        self.chain.first().map(Vec::as_slice)
    }
}

/// A credential built from the live server trust, scoped to this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustCredential {
    leaf_der: Vec<u8>,
}

impl TrustCredential {
    #[must_use]
    pub fn leaf_der(&self) -> &[u8] {
        &self.leaf_der
    }
}

/// The validator's answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Trust this specific connection with a credential built from the
    /// presented server trust.
    UseCredential(TrustCredential),
    /// Let the transport's standard validation decide; pinning abstains.
    PerformDefaultHandling,
    /// Refuse the protection space. Never falls back to default handling.
    RejectProtectionSpace,
}

/// Evaluates TLS authentication challenges against the pin store.
///
/// Invoked once per challenge. Non-server-trust challenges pass through to
/// default handling untouched. Server-trust challenges are decided solely by
/// public-key equality between the pinned certificate and the presented leaf;
/// any failure to load, parse, or evaluate the pin is a rejection.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    store: PinStore,
}

impl CertificateValidator {
    #[must_use]
    pub fn new(store: PinStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn evaluate(&self, challenge: &AuthenticationChallenge<'_>) -> ChallengeDisposition {
        match challenge {
            AuthenticationChallenge::Other => ChallengeDisposition::PerformDefaultHandling,
            AuthenticationChallenge::ServerTrust(trust) => self.evaluate_server_trust(trust),
        }
    }

    fn evaluate_server_trust(&self, trust: &ServerTrust<'_>) -> ChallengeDisposition {
        let Some(pinned_key) = self.pinned_public_key(trust.host) else {
            return ChallengeDisposition::RejectProtectionSpace;
        };

        let Some(leaf) = trust.leaf() else {
            tracing::warn!(host = trust.host, "server trust presented an empty chain");
            return ChallengeDisposition::RejectProtectionSpace;
        };
        let Some(live_key) = public_key_bytes(leaf) else {
            tracing::warn!(host = trust.host, "presented leaf certificate is unparseable");
            return ChallengeDisposition::RejectProtectionSpace;
        };

        if live_key == pinned_key {
            tracing::debug!(host = trust.host, "pinned key matched presented server key");
            ChallengeDisposition::UseCredential(TrustCredential {
                leaf_der: leaf.to_vec(),
            })
        } else {
            tracing::warn!(host = trust.host, "server key does not match pinned key");
            ChallengeDisposition::RejectProtectionSpace
        }
    }

    /// Load and evaluate the pinned certificate for `host`, returning its
    /// public-key bytes. `None` covers every failure mode: no resource, DER
    /// parse failure, or a pin outside its validity window.
    fn pinned_public_key(&self, host: &str) -> Option<Vec<u8>> {
        let der = self.store.load(host)?;
        let (_, certificate) = X509Certificate::from_der(&der).ok()?;
        // Basic X.509 policy: the pin itself must be inside its validity window.
        if !certificate.validity().is_valid() {
            tracing::warn!(host, "pinned certificate is outside its validity window");
            return None;
        }
        Some(certificate.public_key().raw.to_vec())
    }
}

/// The full SubjectPublicKeyInfo bytes of a DER certificate.
fn public_key_bytes(der: &[u8]) -> Option<Vec<u8>> {
    let (_, certificate) = X509Certificate::from_der(der).ok()?;
    Some(certificate.public_key().raw.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rcgen::generate_simple_self_signed;

    fn write_pin(dir: &std::path::Path, resource: &str, der: &[u8]) {
        std::fs::write(dir.join(format!("{resource}.cer")), der).unwrap();
    }

    fn validator(dir: &std::path::Path) -> CertificateValidator {
        CertificateValidator::new(PinStore::new(dir))
    }

    fn server_trust_challenge<'a>(
        host: &'a str,
        chain: &'a [Vec<u8>],
    ) -> AuthenticationChallenge<'a> {
        AuthenticationChallenge::ServerTrust(ServerTrust { host, chain })
    }

    #[test]
    fn matching_key_is_accepted_with_presented_trust() {
        let dir = tempfile::tempdir().unwrap();
        let certified = generate_simple_self_signed(vec!["api.parse.com".to_string()]).unwrap();
        let der = certified.cert.der().to_vec();
        write_pin(dir.path(), "api.parse.com", &der);

        let chain = vec![der.clone()];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));

        match disposition {
            ChallengeDisposition::UseCredential(credential) => {
                assert_eq!(credential.leaf_der(), der.as_slice());
            }
            other => panic!("expected UseCredential, got {other:?}"),
        }
    }

    #[test]
    fn renewed_certificate_with_same_key_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let key = rcgen::KeyPair::generate().unwrap();
        let pinned = rcgen::CertificateParams::new(vec!["api.parse.com".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let renewed = rcgen::CertificateParams::new(vec![
            "api.parse.com".to_string(),
            "files.parse.com".to_string(),
        ])
        .unwrap()
        .self_signed(&key)
        .unwrap();
        write_pin(dir.path(), "api.parse.com", pinned.der());

        let chain = vec![renewed.der().to_vec()];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));
        assert!(matches!(disposition, ChallengeDisposition::UseCredential(_)));
    }

    #[test]
    fn mismatched_key_rejects_protection_space() {
        let dir = tempfile::tempdir().unwrap();
        let pinned = generate_simple_self_signed(vec!["api.parse.com".to_string()]).unwrap();
        let imposter = generate_simple_self_signed(vec!["api.parse.com".to_string()]).unwrap();
        write_pin(dir.path(), "api.parse.com", pinned.cert.der());

        let chain = vec![imposter.cert.der().to_vec()];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));
        assert_eq!(disposition, ChallengeDisposition::RejectProtectionSpace);
    }

    #[test]
    fn non_server_trust_challenge_uses_default_handling() {
        // No pin resources exist at all; the decision must be independent of
        // pin state.
        let dir = tempfile::tempdir().unwrap();
        let disposition = validator(dir.path()).evaluate(&AuthenticationChallenge::Other);
        assert_eq!(disposition, ChallengeDisposition::PerformDefaultHandling);
    }

    #[test]
    fn missing_pin_resource_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let live = generate_simple_self_signed(vec!["api.parse.com".to_string()]).unwrap();

        let chain = vec![live.cert.der().to_vec()];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));
        assert_eq!(disposition, ChallengeDisposition::RejectProtectionSpace);
    }

    #[test]
    fn unparseable_pin_rejects() {
        let dir = tempfile::tempdir().unwrap();
        write_pin(dir.path(), "api.parse.com", b"garbage");
        let live = generate_simple_self_signed(vec!["api.parse.com".to_string()]).unwrap();

        let chain = vec![live.cert.der().to_vec()];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));
        assert_eq!(disposition, ChallengeDisposition::RejectProtectionSpace);
    }

    #[test]
    fn expired_pin_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["api.parse.com".to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(1975, 1, 1);
        params.not_after = rcgen::date_time_ymd(1976, 1, 1);
        let expired = params.self_signed(&key).unwrap();
        write_pin(dir.path(), "api.parse.com", expired.der());

        let chain = vec![expired.der().to_vec()];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));
        assert_eq!(disposition, ChallengeDisposition::RejectProtectionSpace);
    }

    #[test]
    fn empty_chain_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let pinned = generate_simple_self_signed(vec!["api.parse.com".to_string()]).unwrap();
        write_pin(dir.path(), "api.parse.com", pinned.cert.der());

        let chain: Vec<Vec<u8>> = Vec::new();
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "api.parse.com",
            &chain,
        ));
        assert_eq!(disposition, ChallengeDisposition::RejectProtectionSpace);
    }

    #[test]
    fn custom_domain_resolves_through_fallback_pin() {
        let dir = tempfile::tempdir().unwrap();
        let certified =
            generate_simple_self_signed(vec!["files.customer.example".to_string()]).unwrap();
        let der = certified.cert.der().to_vec();
        write_pin(dir.path(), "parse.com", &der);

        let chain = vec![der];
        let disposition = validator(dir.path()).evaluate(&server_trust_challenge(
            "files.customer.example",
            &chain,
        ));
        assert!(matches!(disposition, ChallengeDisposition::UseCredential(_)));
    }
}
