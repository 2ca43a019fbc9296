use clap::Parser;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use dns_filter::config::{BlockPolicy, DEFAULT_LISTEN_PORT, ServerConfig, parse_upstream};
use dns_filter::proxy;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dns-filter")]
#[command(about = "Filtering DNS relay with a mutable block-list", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Upstream DNS server (ip or ip:port)
    #[arg(short, long, default_value = "8.8.8.8:53", value_parser = parse_upstream)]
    upstream: SocketAddr,

    /// Address returned in A answers for blocked names
    #[arg(long, default_value = "0.0.0.0")]
    block_address: Ipv4Addr,

    /// TTL of synthetic answers, in seconds
    #[arg(long, default_value_t = 60)]
    ttl: u32,

    /// Upstream timeout, in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Rule file (one name per line, `*.name` for a name and its subdomains)
    #[arg(short, long, default_value = "config/blocked_domains.txt")]
    rules: PathBuf,

    /// Serve the management API on this address (e.g. 127.0.0.1:8080)
    #[arg(long)]
    api: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            listen_addr: SocketAddr::new(self.bind, self.port),
            upstream: self.upstream,
            block: BlockPolicy {
                address: self.block_address,
                ttl: self.ttl,
            },
            upstream_timeout: Duration::from_millis(self.timeout_ms),
            rules_path: self.rules,
            api_addr: self.api,
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(args.into_config()))
        .inspect_err(|e| error!(error = %e, "DNS filter failed"))
}
