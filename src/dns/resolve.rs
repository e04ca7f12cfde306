//! alias chain resolution with DNSSEC enforcement and peer fallback

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use derive_more::{Display, Error, From};

use crate::dns::exchange::{ExchangeError, QueryExchanger};
use crate::dns::peer::{PeerRegistry, TrustedPeer};
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ResolveError {
    #[display(fmt = "upstream did not assert dnssec validation for {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    DnssecUnauthenticated(String),
    #[display(fmt = "alias loop detected while resolving {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    CnameLoop(String),
    #[display(fmt = "no usable answer for {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    NoUsableAnswer(String),
    #[display(fmt = "no trusted peers configured")]
    NoPeersConfigured,
    Exchange(ExchangeError),
}

type Result<T> = std::result::Result<T, ResolveError>;

/// The verdict on a single response in an alias chain.
#[derive(Debug)]
pub enum ChainStep {
    Accepted(Ipv4Addr),
    Follow(String),
    Rejected(ResolveError),
}

/// DNS names compare case-insensitively and a trailing dot is not
/// significant, so chain bookkeeping works on a normalized form.
fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

/// Judge one response. The authenticated-data gate comes first: an answer
/// the upstream did not validate is rejected before any record is looked
/// at. After that the answer section is scanned in order; the first
/// address record wins outright, otherwise the first alias is followed,
/// and a response with neither is a dead end.
pub fn evaluate_response(domain: &str, response: &DnsPacket) -> ChainStep {
    if !response.header.authed_data {
        return ChainStep::Rejected(ResolveError::DnssecUnauthenticated(domain.to_string()));
    }

    let mut follow = None;
    for record in &response.answers {
        match record {
            DnsRecord::A { addr, .. } => return ChainStep::Accepted(*addr),
            DnsRecord::Cname { host, .. } => {
                if follow.is_none() {
                    follow = Some(host.clone());
                }
            }
            _ => {}
        }
    }

    match follow {
        Some(next) => ChainStep::Follow(next),
        None => ChainStep::Rejected(ResolveError::NoUsableAnswer(domain.to_string())),
    }
}

/// Resolver that follows alias chains one hop at a time through an
/// injected exchanger, falling back across the peers of a registry.
pub struct ChainResolver<E: QueryExchanger> {
    exchanger: E,
    peers: Arc<PeerRegistry>,
}

impl<E: QueryExchanger> ChainResolver<E> {
    pub fn new(exchanger: E, peers: Arc<PeerRegistry>) -> ChainResolver<E> {
        ChainResolver { exchanger, peers }
    }

    /// Resolve `domain` through a single peer, following aliases until an
    /// address is accepted or the chain is rejected. Every name in the
    /// chain is visited at most once; a revisit means the zone contains an
    /// alias loop and the chain is abandoned without another query.
    pub fn resolve(&self, domain: &str, peer: &TrustedPeer) -> Result<Ipv4Addr> {
        let mut visited = HashSet::new();
        let mut current = normalize(domain);

        loop {
            if !visited.insert(current.clone()) {
                return Err(ResolveError::CnameLoop(domain.to_string()));
            }

            let response = self.exchanger.exchange(&current, peer, QueryType::A)?;

            match evaluate_response(&current, &response) {
                ChainStep::Accepted(addr) => {
                    log::debug!("resolved {} to {} via {}", domain, addr, peer.server_name);
                    return Ok(addr);
                }
                ChainStep::Follow(next) => {
                    log::debug!("{} is an alias for {}", current, next);
                    current = normalize(&next);
                }
                ChainStep::Rejected(e) => return Err(e),
            }
        }
    }

    /// Resolve `domain` trying peers strictly in registration order. The
    /// first success wins; failures along the way are logged and the last
    /// one is returned if every peer fails.
    pub fn resolve_any(&self, domain: &str) -> Result<Ipv4Addr> {
        if self.peers.is_empty() {
            return Err(ResolveError::NoPeersConfigured);
        }

        let mut last_err = None;
        for peer in self.peers.iter() {
            match self.resolve(domain, peer) {
                Ok(addr) => return Ok(addr),
                Err(e) => {
                    log::warn!(
                        "resolution of {} via {} ({}) failed: {}",
                        domain,
                        peer.server_name,
                        peer.addr,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(ResolveError::NoPeersConfigured))
    }
}
