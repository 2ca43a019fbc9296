//! UDP transport for DNS queries.
//!
//! One accept loop reads datagrams in sequence and spawns a worker task per
//! datagram, so a slow upstream never holds up other clients. Workers share
//! the listening socket for their replies; each `send_to` is a single
//! datagram, so no extra locking is needed.
//!
//! Fan-out is unbounded: a burst of queries spawns one task per query.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::resolver::Resolver;

use super::MAX_DNS_PACKET_SIZE;

/// UDP transport for the DNS filter.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket. Failing here is fatal for the server.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the UDP transport.
    ///
    /// The accept loop and all workers run on `tracker`; the loop stops when
    /// `shutdown` is cancelled, and in-flight workers run to completion.
    pub fn start(self, resolver: Arc<Resolver>, shutdown: CancellationToken, tracker: &TaskTracker) {
        tracker.spawn(run(self.socket, resolver, shutdown, tracker.clone()));
    }
}

/// Accept loop - spawns a worker task for each incoming datagram.
async fn run(
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "UDP recv error");
                    continue;
                }
            },
        };

        let packet = buf[..len].to_vec();
        let socket = socket.clone();
        let resolver = resolver.clone();

        tracker.spawn(async move {
            let Some(response) = resolver.resolve(&packet).await else {
                return;
            };
            if let Err(e) = socket.send_to(&response, src).await {
                warn!(client = %src, error = %e, "UDP response error");
            }
        });
    }

    debug!("UDP accept loop stopped");
}
