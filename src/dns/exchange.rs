//! single query/response exchanges with a trusted peer over pinned TLS

use std::convert::TryFrom;
use std::io;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName, StreamOwned};

use crate::dns::buffer::VectorPacketBuffer;
use crate::dns::netutil::{read_packet_length, write_packet_length};
use crate::dns::peer::TrustedPeer;
use crate::dns::pinning::{webpki_root_store, PinnedServerVerifier, PIN_FAILURE};
use crate::dns::protocol::{DnsPacket, ProtocolError, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ExchangeError {
    #[display(fmt = "peer failed authentication: {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    PeerUntrusted(String),
    #[display(fmt = "peer did not respond in time")]
    TimedOut,
    #[display(fmt = "response id does not match the query")]
    ResponseMismatch,
    Io(io::Error),
    Protocol(ProtocolError),
}

type Result<T> = std::result::Result<T, ExchangeError>;

/// The seam between the chain resolver and the network. Implementations
/// perform one query and return one parsed response.
pub trait QueryExchanger: Send + Sync {
    fn exchange(&self, domain: &str, peer: &TrustedPeer, qtype: QueryType) -> Result<DnsPacket>;
}

impl<E: QueryExchanger + ?Sized> QueryExchanger for Arc<E> {
    fn exchange(&self, domain: &str, peer: &TrustedPeer, qtype: QueryType) -> Result<DnsPacket> {
        (**self).exchange(domain, peer, qtype)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
        }
    }
}

/// Blocking DNS-over-TLS exchanger.
///
/// Every call opens a fresh TCP connection, performs the TLS handshake with
/// the peer's pin enforced by a `PinnedServerVerifier`, sends exactly one
/// length-prefixed query and reads exactly one length-prefixed response.
/// If the handshake fails, no query bytes are ever written.
pub struct TlsExchanger {
    roots: Arc<RootCertStore>,
    config: ExchangeConfig,
}

impl TlsExchanger {
    pub fn new(config: ExchangeConfig) -> TlsExchanger {
        TlsExchanger::with_roots(Arc::new(webpki_root_store()), config)
    }

    /// Trust the given anchors instead of the bundled Mozilla roots, for
    /// peers whose certificates chain to a private CA.
    pub fn with_roots(roots: Arc<RootCertStore>, config: ExchangeConfig) -> TlsExchanger {
        TlsExchanger { roots, config }
    }

    fn tls_config(&self, peer: &TrustedPeer) -> ClientConfig {
        let verifier = PinnedServerVerifier::new(self.roots.clone(), &peer.spki_pin);
        ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth()
    }
}

impl Default for TlsExchanger {
    fn default() -> Self {
        TlsExchanger::new(ExchangeConfig::default())
    }
}

/// Map a transport error to the exchange taxonomy. TLS failures travel
/// wrapped inside `io::Error`, so certificate rejections have to be fished
/// out of the source chain to become `PeerUntrusted`. Pin failures are
/// recognized by the marker the verifier puts on them; other general TLS
/// errors stay transport errors.
fn classify_io_error(e: io::Error) -> ExchangeError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => return ExchangeError::TimedOut,
        _ => {}
    }

    if let Some(tls) = e.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        match tls {
            rustls::Error::InvalidCertificate(_) => {
                return ExchangeError::PeerUntrusted(tls.to_string());
            }
            rustls::Error::General(msg) if msg.starts_with(PIN_FAILURE) => {
                return ExchangeError::PeerUntrusted(msg.clone());
            }
            _ => {}
        }
    }

    ExchangeError::Io(e)
}

impl QueryExchanger for TlsExchanger {
    fn exchange(&self, domain: &str, peer: &TrustedPeer, qtype: QueryType) -> Result<DnsPacket> {
        let mut packet = DnsPacket::query(domain, qtype);
        let query_id = packet.header.id;

        let mut req_buffer = VectorPacketBuffer::new();
        packet.write(&mut req_buffer)?;

        let sockaddr = SocketAddr::from((peer.addr, peer.port));
        let mut tcp = TcpStream::connect_timeout(&sockaddr, self.config.connect_timeout)
            .map_err(classify_io_error)?;
        tcp.set_read_timeout(Some(self.config.io_timeout))?;
        tcp.set_write_timeout(Some(self.config.io_timeout))?;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(peer.server_name.as_str())
            .map_err(|_| ExchangeError::PeerUntrusted(format!(
                "{} is not a valid server name",
                peer.server_name
            )))?;

        let mut conn = ClientConnection::new(Arc::new(self.tls_config(peer)), server_name)
            .map_err(|e| ExchangeError::PeerUntrusted(e.to_string()))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(classify_io_error)?;
        }

        log::debug!(
            "tls session established with {} ({}), querying {} {:?}",
            peer.server_name,
            peer.addr,
            domain,
            qtype
        );

        let mut stream = StreamOwned::new(conn, tcp);

        write_packet_length(&mut stream, req_buffer.buffer.len()).map_err(classify_io_error)?;
        stream
            .write_all(&req_buffer.buffer)
            .map_err(classify_io_error)?;
        stream.flush().map_err(classify_io_error)?;

        let len = read_packet_length(&mut stream).map_err(classify_io_error)?;
        let mut data = vec![0; len as usize];
        stream.read_exact(&mut data).map_err(classify_io_error)?;

        let mut res_buffer = VectorPacketBuffer::from_bytes(&data);
        let response = DnsPacket::from_buffer(&mut res_buffer)?;

        if response.header.id != query_id {
            return Err(ExchangeError::ResponseMismatch);
        }

        Ok(response)
    }
}
