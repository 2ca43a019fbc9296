//! DNS query resolution logic.
//!
//! Handles the per-datagram pipeline:
//! 1. Decode (drop malformed or question-less datagrams)
//! 2. Filter against the rule set, answering blocked names locally
//! 3. Forward everything else upstream, turning failures into SERVFAIL
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::BlockPolicy;
use crate::dns::DnsMessage;
use crate::error::DecodeError;
use crate::filter::{RuleSet, filter_query};
use crate::stats::{Outcome, Stats, StatsSnapshot};
use crate::upstream::Upstream;

/// Action to take for a DNS query.
#[derive(Debug)]
pub enum QueryAction {
    /// Datagram is not a usable query, send nothing.
    Drop(DecodeError),
    /// Query is blocked, return this response immediately.
    Blocked { response: Vec<u8>, domain: String },
    /// Query should be forwarded to upstream.
    Forward(DnsMessage),
}

/// Resolver handles DNS query processing decisions.
///
/// Holds the shared rule set, the upstream and the block policy. Stateless
/// across datagrams, so one instance serves every concurrent worker.
pub struct Resolver {
    rules: Arc<RuleSet>,
    upstream: Upstream,
    block: BlockPolicy,
    stats: Stats,
}

impl Resolver {
    pub fn new(rules: Arc<RuleSet>, upstream: Upstream, block: BlockPolicy) -> Self {
        Self {
            rules,
            upstream,
            block,
            stats: Stats::new(),
        }
    }

    /// Decode and classify a datagram without doing any I/O.
    pub fn process_query(&self, packet: &[u8]) -> QueryAction {
        let query = match DnsMessage::parse(packet) {
            Ok(q) => q,
            Err(e) => return QueryAction::Drop(e),
        };

        match filter_query(&self.rules, &query, &self.block) {
            Some(response) => QueryAction::Blocked {
                response,
                domain: query.question().domain.clone(),
            },
            None => QueryAction::Forward(query),
        }
    }

    /// Run the full pipeline for one datagram.
    ///
    /// Returns the single reply to send back, or `None` when the datagram is
    /// dropped. Upstream failures never produce `None`.
    pub async fn resolve(&self, packet: &[u8]) -> Option<Vec<u8>> {
        let start_time = Instant::now();

        let (reply, outcome, domain) = match self.process_query(packet) {
            QueryAction::Drop(e) => {
                debug!(error = %e, len = packet.len(), "Dropping undecodable datagram");
                self.stats.record(Outcome::Dropped, elapsed_ms(start_time));
                return None;
            }
            QueryAction::Blocked { response, domain } => (response, Outcome::Blocked, domain),
            QueryAction::Forward(query) => match self.upstream.exchange(&query).await {
                Ok(reply) => (reply, Outcome::Forwarded, query.question().domain.clone()),
                Err(e) => {
                    warn!(
                        domain = %query.question().domain,
                        upstream = %self.upstream.addr(),
                        error = %e,
                        "Upstream failed, answering SERVFAIL"
                    );
                    (
                        query.servfail_response(),
                        Outcome::ServFail,
                        query.question().domain.clone(),
                    )
                }
            },
        };

        let elapsed = elapsed_ms(start_time);
        self.stats.record(outcome, elapsed);
        debug!(%domain, outcome = outcome.as_str(), total_ms = elapsed, "Query handled");

        Some(reply)
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Returns the number of rules currently loaded.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
