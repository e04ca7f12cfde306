//! The `dns` module implements hardened hostname resolution: queries are
//! exchanged over DNS-over-TLS with SPKI-pinned peers, answers are only
//! accepted when the upstream asserts DNSSEC validation, and alias chains
//! are followed with loop protection.

pub mod buffer;
pub mod dialer;
pub mod exchange;
pub mod netutil;
pub mod peer;
pub mod pinning;
pub mod protocol;
pub mod resolve;
