//! certificate public key pinning for the TLS transport
//!
//! A peer's certificate has to clear two independent checks before a
//! single query byte leaves the socket: the standard WebPKI chain and
//! identity validation against the Mozilla root bundle, and a byte-for-byte
//! match of the leaf's SubjectPublicKeyInfo fingerprint against the pin
//! configured for the peer. Pinning narrows trust, it never widens it.

use std::sync::Arc;
use std::time::SystemTime;

use derive_more::{Display, Error};
use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, OwnedTrustAnchor, RootCertStore, ServerName};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

#[derive(Debug, Display, Error)]
pub enum PinError {
    #[display(fmt = "failed to parse certificate: {}", _0)]
    #[error(ignore)]
    Parse(String),
    #[display(fmt = "public key fingerprint {} does not match the pin", _0)]
    #[error(ignore)]
    Mismatch(String),
}

type Result<T> = std::result::Result<T, PinError>;

/// Prefix carried by TLS errors that originate from a pin failure, so the
/// transport layer can tell them apart from other handshake errors.
pub(crate) const PIN_FAILURE: &str = "pinned key verification failed";

/// Compute the SPKI fingerprint of a DER certificate: standard base64 of
/// the SHA-256 over the raw DER SubjectPublicKeyInfo.
pub fn spki_pin(cert_der: &[u8]) -> Result<String> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| PinError::Parse(e.to_string()))?;

    let spki = cert.public_key().raw;
    let digest = Sha256::digest(spki);

    Ok(base64::encode(digest))
}

/// Check a DER certificate's SPKI fingerprint against an expected pin.
/// Pure comparison, no I/O; a malformed certificate is a hard failure.
pub fn verify_spki_pin(cert_der: &[u8], expected: &str) -> Result<()> {
    let actual = spki_pin(cert_der)?;
    if actual != expected {
        return Err(PinError::Mismatch(actual));
    }
    Ok(())
}

/// Build a root store from the bundled Mozilla trust anchors.
pub fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    roots
}

/// Certificate verifier that layers an SPKI pin on top of full WebPKI
/// validation. Both must pass; there is no relaxed mode.
pub struct PinnedServerVerifier {
    webpki: WebPkiVerifier,
    expected_pin: String,
}

impl PinnedServerVerifier {
    pub fn new(roots: Arc<RootCertStore>, expected_pin: &str) -> PinnedServerVerifier {
        PinnedServerVerifier {
            webpki: WebPkiVerifier::new(roots, None),
            expected_pin: expected_pin.to_string(),
        }
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // Chain and identity first; the pin is additional, not a substitute.
        self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            scts,
            ocsp_response,
            now,
        )?;

        verify_spki_pin(&end_entity.0, &self.expected_pin)
            .map_err(|e| rustls::Error::General(format!("{}: {}", PIN_FAILURE, e)))?;

        Ok(ServerCertVerified::assertion())
    }
}
