//! Transport layer for the DNS filter.
//!
//! Receives DNS queries from clients and sends back whatever the resolver
//! decides. Only UDP is served.

pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Largest possible UDP payload. Upstream replies are read into a buffer of
/// this size so that no datagram is ever cut short.
pub const MAX_UDP_PAYLOAD: usize = 65_535;
