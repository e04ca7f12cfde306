//! connects TCP sockets to host:port targets, resolving the host through
//! the secure resolver only
//!
//! This is the seam handed to code that expects a dial function. Hostname
//! resolution goes through the pinned, DNSSEC-enforcing path with no
//! fallback of any kind: if secure resolution fails, the dial fails.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::dns::exchange::QueryExchanger;
use crate::dns::resolve::{ChainResolver, ResolveError};

#[derive(Debug, Display, From, Error)]
pub enum DialError {
    #[display(fmt = "malformed dial address {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    BadAddress(String),
    Resolve(ResolveError),
    #[display(fmt = "dial cancelled")]
    Cancelled,
    #[display(fmt = "resolution produced no address")]
    NoAddressFound,
    Io(io::Error),
}

type Result<T> = std::result::Result<T, DialError>;

/// Cooperative cancellation signal, checked between the blocking phases of
/// a dial. Cheap to clone and share across threads.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DialConfig {
    pub connect_timeout: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        DialConfig {
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Dialer that only ever connects to addresses obtained from the secure
/// resolver (or written literally into the target).
pub struct SecureDialer<E: QueryExchanger> {
    resolver: ChainResolver<E>,
    config: DialConfig,
}

impl<E: QueryExchanger> SecureDialer<E> {
    pub fn new(resolver: ChainResolver<E>, config: DialConfig) -> SecureDialer<E> {
        SecureDialer { resolver, config }
    }

    /// Connect to `addr` ("host:port"). The host part is resolved through
    /// the secure path unless it is already an IPv4 literal. The flag is
    /// checked before resolution and again before the connect, so a
    /// cancelled dial never opens a socket.
    pub fn dial(&self, addr: &str, cancel: &CancelFlag) -> Result<TcpStream> {
        if cancel.is_cancelled() {
            return Err(DialError::Cancelled);
        }

        let (host, port) = split_host_port(addr)?;
        let addrs = self.resolve_host(host)?;

        if cancel.is_cancelled() {
            return Err(DialError::Cancelled);
        }

        let ip = addrs.first().ok_or(DialError::NoAddressFound)?;
        let target = SocketAddr::from((*ip, port));

        log::debug!("dialing {} at {}", addr, target);
        let stream = TcpStream::connect_timeout(&target, self.config.connect_timeout)?;
        Ok(stream)
    }

    fn resolve_host(&self, host: &str) -> Result<Vec<Ipv4Addr>> {
        // An address literal needs no lookup
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(vec![ip]);
        }

        let addr = self.resolver.resolve_any(host)?;
        Ok(vec![addr])
    }
}

fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = match addr.rsplit_once(':') {
        Some(parts) => parts,
        None => return Err(DialError::BadAddress(addr.to_string())),
    };

    if host.is_empty() {
        return Err(DialError::BadAddress(addr.to_string()));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| DialError::BadAddress(addr.to_string()))?;

    Ok((host, port))
}
