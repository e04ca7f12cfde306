//! End to end exercises of the resolver and dialer through the public API,
//! with a scripted exchanger standing in for the network path and real TCP
//! sockets on the dial side.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use veridns::dns::dialer::{CancelFlag, DialConfig, DialError, SecureDialer};
use veridns::dns::exchange::{ExchangeError, QueryExchanger};
use veridns::dns::peer::{PeerRegistry, TrustedPeer};
use veridns::dns::protocol::{DnsPacket, DnsRecord, QueryType, TransientTtl};
use veridns::dns::resolve::{ChainResolver, ResolveError};

type Script =
    Box<dyn Fn(&str, &TrustedPeer) -> Result<DnsPacket, ExchangeError> + Send + Sync>;

struct ScriptedExchanger {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedExchanger {
    fn new(script: Script) -> Arc<ScriptedExchanger> {
        Arc::new(ScriptedExchanger {
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

impl QueryExchanger for ScriptedExchanger {
    fn exchange(
        &self,
        domain: &str,
        peer: &TrustedPeer,
        _qtype: QueryType,
    ) -> Result<DnsPacket, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(domain, peer)
    }
}

fn authed_a(domain: &str, addr: Ipv4Addr) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.response = true;
    packet.header.authed_data = true;
    packet.answers.push(DnsRecord::A {
        domain: domain.to_string(),
        addr,
        ttl: TransientTtl(60),
    });
    packet
}

fn peer(last_octet: u8) -> TrustedPeer {
    TrustedPeer::new(
        "cGlu",
        "dns.example",
        Ipv4Addr::new(192, 0, 2, last_octet),
        853,
    )
    .unwrap()
}

fn registry(peers: Vec<TrustedPeer>) -> Arc<PeerRegistry> {
    Arc::new(PeerRegistry::new(peers).unwrap())
}

fn dialer(exchanger: Arc<ScriptedExchanger>, peers: Vec<TrustedPeer>) -> SecureDialer<Arc<ScriptedExchanger>> {
    let resolver = ChainResolver::new(exchanger, registry(peers));
    SecureDialer::new(resolver, DialConfig::default())
}

#[test]
fn dial_connects_to_resolved_address() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let exchanger = ScriptedExchanger::new(Box::new(|domain, _| {
        Ok(authed_a(domain, Ipv4Addr::new(127, 0, 0, 1)))
    }));
    let dialer = dialer(exchanger.clone(), vec![peer(1)]);

    let stream = dialer
        .dial(&format!("svc.internal:{}", port), &CancelFlag::new())
        .unwrap();

    let (_, remote) = listener.accept().unwrap();
    assert_eq!(stream.local_addr().unwrap(), remote);
    assert_eq!(1, exchanger.calls.load(Ordering::SeqCst));
}

#[test]
fn dial_to_ip_literal_needs_no_lookup() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let exchanger = ScriptedExchanger::new(Box::new(|_, _| Err(ExchangeError::TimedOut)));
    let dialer = dialer(exchanger.clone(), vec![peer(1)]);

    dialer
        .dial(&format!("127.0.0.1:{}", port), &CancelFlag::new())
        .unwrap();

    assert_eq!(0, exchanger.calls.load(Ordering::SeqCst));
}

#[test]
fn resolution_failure_fails_the_dial() {
    // The upstream answers, but without the authenticated-data assertion
    let exchanger = ScriptedExchanger::new(Box::new(|domain, _| {
        let mut packet = authed_a(domain, Ipv4Addr::new(127, 0, 0, 1));
        packet.header.authed_data = false;
        Ok(packet)
    }));
    let dialer = dialer(exchanger, vec![peer(1)]);

    match dialer.dial("svc.internal:443", &CancelFlag::new()) {
        Err(DialError::Resolve(ResolveError::DnssecUnauthenticated(domain))) => {
            assert_eq!("svc.internal", domain);
        }
        other => panic!("expected DnssecUnauthenticated, got {:?}", other),
    }
}

#[test]
fn dial_falls_back_across_peers() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let exchanger = ScriptedExchanger::new(Box::new(|domain, peer| {
        if peer.addr == Ipv4Addr::new(192, 0, 2, 1) {
            Err(ExchangeError::TimedOut)
        } else {
            Ok(authed_a(domain, Ipv4Addr::new(127, 0, 0, 1)))
        }
    }));
    let dialer = dialer(exchanger.clone(), vec![peer(1), peer(2)]);

    dialer
        .dial(&format!("svc.internal:{}", port), &CancelFlag::new())
        .unwrap();

    assert_eq!(2, exchanger.calls.load(Ordering::SeqCst));
}

#[test]
fn cancelled_dial_does_nothing() {
    let exchanger = ScriptedExchanger::new(Box::new(|domain, _| {
        Ok(authed_a(domain, Ipv4Addr::new(127, 0, 0, 1)))
    }));
    let dialer = dialer(exchanger.clone(), vec![peer(1)]);

    let cancel = CancelFlag::new();
    cancel.cancel();

    match dialer.dial("svc.internal:443", &cancel) {
        Err(DialError::Cancelled) => {}
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert_eq!(0, exchanger.calls.load(Ordering::SeqCst));
}
