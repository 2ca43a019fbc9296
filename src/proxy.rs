//! DNS filter orchestration.
//!
//! Binds the listeners, wires the rule set into the resolver and the
//! management API, and owns the lifecycle of every task it starts.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::api::create_api_routes;
use crate::config::ServerConfig;
use crate::filter::RuleSet;
use crate::resolver::Resolver;
use crate::transport::udp::UdpTransport;
use crate::upstream::Upstream;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// A running DNS filter.
///
/// Dropping the handle does not stop the server; call [`Proxy::shutdown`].
pub struct Proxy {
    dns_addr: SocketAddr,
    api_addr: Option<SocketAddr>,
    resolver: Arc<Resolver>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Proxy {
    /// Bind all listeners and start serving.
    ///
    /// Bind failures are returned before anything is spawned.
    pub async fn start(config: &ServerConfig, rules: Arc<RuleSet>) -> io::Result<Self> {
        let upstream = Upstream::new(config.upstream, config.upstream_timeout);
        let resolver = Arc::new(Resolver::new(rules.clone(), upstream, config.block));

        let udp = UdpTransport::bind(config.listen_addr).await?;
        let dns_addr = udp.local_addr()?;

        let api_listener = match config.api_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        let api_addr = api_listener.as_ref().map(TcpListener::local_addr).transpose()?;

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        info!(
            listen = %dns_addr,
            upstream = %config.upstream,
            rules = resolver.rule_count(),
            "DNS filter listening"
        );
        udp.start(resolver.clone(), shutdown.clone(), &tracker);

        if let Some(listener) = api_listener {
            info!(listen = ?api_addr, "Management API listening");
            let app = create_api_routes(rules);
            let stop = shutdown.clone();
            tracker.spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await
                {
                    warn!(error = %e, "Management API stopped");
                }
            });
        }

        tracker.spawn(log_stats(resolver.clone(), shutdown.clone()));

        Ok(Self {
            dns_addr,
            api_addr,
            resolver,
            shutdown,
            tracker,
        })
    }

    /// Address the DNS listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.dns_addr
    }

    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Stop accepting queries and wait for in-flight workers to finish.
    ///
    /// Workers are bounded by the upstream timeout, so this returns within
    /// roughly one timeout.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("DNS filter stopped");
    }
}

/// Log stats every interval until shutdown.
async fn log_stats(resolver: Arc<Resolver>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await; // Skip first immediate tick
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let stats = resolver.stats_snapshot_and_reset();
        info!(
            uptime_secs = stats.uptime_secs,
            rules = resolver.rule_count(),
            requests = stats.requests,
            blocked = stats.blocked,
            forwarded = stats.forwarded,
            servfail = stats.servfail,
            dropped = stats.dropped,
            avg_response_ms = stats.avg_response_ms,
            "stats"
        );
    }
}

/// Run the DNS filter with the given configuration until Ctrl-C.
pub async fn run(config: ServerConfig) -> io::Result<()> {
    let rules = Arc::new(RuleSet::from_file(&config.rules_path));
    let proxy = Proxy::start(&config, rules).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    proxy.shutdown().await;
    Ok(())
}
