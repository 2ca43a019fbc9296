//! Process-wide configuration for the relay.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default port the filter listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 5353;
/// Port assumed for an upstream given without one.
pub const DEFAULT_UPSTREAM_PORT: u16 = 53;

/// How blocked names are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPolicy {
    /// Address returned in synthetic A records.
    pub address: Ipv4Addr,
    /// TTL of synthetic A records, in seconds.
    pub ttl: u32,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            ttl: 60,
        }
    }
}

/// Configuration for the DNS filter. Read-only once the server starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address the UDP listener binds (e.g., 0.0.0.0:5353)
    pub listen_addr: SocketAddr,
    /// Upstream resolver non-blocked queries are relayed to
    pub upstream: SocketAddr,
    pub block: BlockPolicy,
    /// Upper bound on a single upstream exchange
    pub upstream_timeout: Duration,
    /// Plain-text rule file backing the rule set
    pub rules_path: PathBuf,
    /// Management API address, disabled when `None`
    pub api_addr: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), DEFAULT_LISTEN_PORT),
            upstream: SocketAddr::new(Ipv4Addr::new(8, 8, 8, 8).into(), DEFAULT_UPSTREAM_PORT),
            block: BlockPolicy::default(),
            upstream_timeout: Duration::from_secs(2),
            rules_path: PathBuf::from("config/blocked_domains.txt"),
            api_addr: None,
        }
    }
}

/// Parse an upstream given as `host:port` or a bare IP address.
///
/// A bare address gets port 53. IPv6 addresses with a port use the
/// bracketed form, `[2001:db8::1]:53`.
pub fn parse_upstream(s: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_UPSTREAM_PORT))
        .map_err(|_| format!("invalid upstream address: {s}"))
}
