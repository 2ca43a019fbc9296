//! Upstream forwarding.
//!
//! Each forwarded query gets its own ephemeral UDP socket connected to the
//! upstream, so replies can only come from the upstream address and no
//! state is shared between in-flight queries.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::dns::DnsMessage;
use crate::error::UpstreamError;
use crate::transport::MAX_UDP_PAYLOAD;

/// A single upstream resolver with a bounded wait per exchange.
#[derive(Debug, Clone)]
pub struct Upstream {
    addr: SocketAddr,
    timeout: Duration,
}

impl Upstream {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send the query bytes unchanged and return the upstream's reply verbatim.
    ///
    /// The reply must decode and answer this query (same id and question,
    /// or a question-less error reply); anything else is an error. There is
    /// no retry.
    pub async fn exchange(&self, query: &DnsMessage) -> Result<Vec<u8>, UpstreamError> {
        let bind_addr: SocketAddr = if self.addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.addr).await?;

        let round_trip = async {
            socket.send(query.as_bytes()).await?;
            let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
            let len = socket.recv(&mut buf).await?;
            buf.truncate(len);
            Ok::<_, std::io::Error>(buf)
        };

        let reply = timeout(self.timeout, round_trip)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let decoded = DnsMessage::parse_reply(&reply)?;
        query.match_reply(&decoded).map_err(UpstreamError::Mismatch)?;

        Ok(reply)
    }
}
