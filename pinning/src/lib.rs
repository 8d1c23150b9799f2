//! TLS certificate pinning for Courier.
//!
//! # Architecture
//!
//! Three pieces, smallest first:
//!
//! - [`PinStore`] - resolves a host name to a pinned-certificate resource and
//!   loads its raw DER bytes from the packaged resource directory.
//! - [`CertificateValidator`] - evaluates a server-trust challenge against the
//!   pinned key and produces an accept/reject [`ChallengeDisposition`].
//! - [`PinnedServerVerifier`] - a `rustls` adapter that applies the same
//!   decision during real handshakes, for wiring into an HTTP client.
//!
//! # Fail-closed
//!
//! Every failure on the pinning path - missing resource, unparseable
//! certificate, expired pin, no presented chain - resolves to
//! [`ChallengeDisposition::RejectProtectionSpace`]. Default platform handling
//! is reserved for challenges that are not server-trust challenges at all.
//! A rejected handshake reaches callers as an ordinary transport error; there
//! is no path that accepts a connection after pin evaluation failed.
//!
//! # Key equality, not certificate identity
//!
//! The comparison is between public-key bytes (the full SubjectPublicKeyInfo),
//! not certificate fingerprints. Servers can renew certificates without
//! breaking pinning as long as the underlying key is unchanged.

mod store;
mod validator;
mod verifier;

pub use store::{FALLBACK_PIN_RESOURCE, PRIMARY_PIN_HOST, PRIMARY_PIN_RESOURCE, PinStore};
pub use validator::{
    AuthenticationChallenge, CertificateValidator, ChallengeDisposition, ServerTrust,
    TrustCredential,
};
pub use verifier::{PinnedServerVerifier, pinned_client_config};
