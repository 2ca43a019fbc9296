//! DNS query filtering module.
//!
//! Classifies queries against a mutable rule set of exact names and
//! `*.suffix` wildcards, and answers blocked names locally.

mod rule_set;
mod source;

pub use rule_set::{Rule, RuleSet, Rules};
pub use source::{MemorySource, RuleFile, RuleSource};

use crate::config::BlockPolicy;
use crate::dns::DnsMessage;

/// Check if a DNS query should be blocked and return an appropriate response.
///
/// Only the first question is classified. Returns `Some(response)` if the
/// query is blocked, `None` if it should be forwarded to upstream.
pub fn filter_query(rules: &RuleSet, query: &DnsMessage, policy: &BlockPolicy) -> Option<Vec<u8>> {
    if rules.classify(&query.question().domain) {
        Some(query.blocked_response(policy))
    } else {
        None
    }
}
