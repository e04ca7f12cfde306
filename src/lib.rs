//! veridns resolves hostnames to IPv4 addresses over an authenticated,
//! encrypted DNS path. An address is only returned when the transport was
//! authenticated against a pinned server key and the answer carried the
//! DNSSEC authenticated-data assertion from a validating upstream.

pub mod dns;
