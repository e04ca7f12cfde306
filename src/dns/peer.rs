//! trusted upstream resolvers and the registry holding them
//!
//! A peer is only usable if we know three things about it up front: where
//! to reach it, the identity its certificate must present, and the SPKI
//! fingerprint its certificate must match. There is no discovery and no
//! trust-on-first-use; the registry is built once and never mutated.

use std::net::Ipv4Addr;

use derive_more::{Display, Error, From};
use serde_derive::Deserialize;

#[derive(Debug, Display, From, Error)]
pub enum PeerError {
    #[display(fmt = "peer {} has an empty key fingerprint", _0)]
    #[from(ignore)]
    #[error(ignore)]
    EmptyPin(String),
    #[display(fmt = "peer {} has an empty expected identity", _0)]
    #[from(ignore)]
    #[error(ignore)]
    EmptyServerName(String),
    Config(serde_yaml::Error),
}

type Result<T> = std::result::Result<T, PeerError>;

fn default_port() -> u16 {
    853
}

/// A single DNS-over-TLS upstream, pinned by SPKI fingerprint.
///
/// Field names in the serialized form match the deployed peer files:
/// `pinnedKeyFingerprint` is the standard base64 of the SHA-256 over the
/// certificate's DER SubjectPublicKeyInfo, `expectedIdentity` is both the
/// SNI value and the name the certificate must be valid for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrustedPeer {
    #[serde(rename = "pinnedKeyFingerprint")]
    pub spki_pin: String,
    #[serde(rename = "expectedIdentity")]
    pub server_name: String,
    #[serde(rename = "address")]
    pub addr: Ipv4Addr,
    #[serde(rename = "port", default = "default_port")]
    pub port: u16,
}

impl TrustedPeer {
    pub fn new(spki_pin: &str, server_name: &str, addr: Ipv4Addr, port: u16) -> Result<TrustedPeer> {
        let peer = TrustedPeer {
            spki_pin: spki_pin.to_string(),
            server_name: server_name.to_string(),
            addr,
            port,
        };
        peer.validate()?;
        Ok(peer)
    }

    fn validate(&self) -> Result<()> {
        if self.spki_pin.is_empty() {
            return Err(PeerError::EmptyPin(self.addr.to_string()));
        }
        if self.server_name.is_empty() {
            return Err(PeerError::EmptyServerName(self.addr.to_string()));
        }
        Ok(())
    }
}

/// Immutable, ordered collection of trusted peers.
///
/// Order is significant: the fallback orchestrator tries peers strictly in
/// registration order. The registry is cheap to share behind an `Arc` and
/// needs no locking since it never changes after construction.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Vec<TrustedPeer>,
}

impl PeerRegistry {
    pub fn new(peers: Vec<TrustedPeer>) -> Result<PeerRegistry> {
        for peer in &peers {
            peer.validate()?;
        }
        Ok(PeerRegistry { peers })
    }

    /// Load a registry from YAML, a list of peer entries in the external
    /// config shape.
    pub fn from_yaml(data: &str) -> Result<PeerRegistry> {
        let peers: Vec<TrustedPeer> = serde_yaml::from_str(data)?;
        PeerRegistry::new(peers)
    }

    /// The peers provisioned by default: Cloudflare's public DoT resolver.
    ///
    /// The fingerprint can be reproduced with:
    /// openssl s_client -connect 1.1.1.1:853 2>/dev/null </dev/null | \
    ///   openssl x509 -pubkey -noout | openssl pkey -pubin -outform der | \
    ///   openssl dgst -sha256 -binary | openssl enc -base64
    pub fn well_known() -> PeerRegistry {
        PeerRegistry {
            peers: vec![TrustedPeer {
                spki_pin: "HdDBgtnj07/NrKNmLCbg5rxK78ZehdHZ/Uoutx4iHzY=".to_string(),
                server_name: "one.one.one.one".to_string(),
                addr: Ipv4Addr::new(1, 1, 1, 1),
                port: 853,
            }],
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrustedPeer> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
