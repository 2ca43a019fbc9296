//! dns-filter - A filtering DNS relay.
//!
//! Answers queries for blocked names locally and relays everything else to
//! a single upstream resolver. The block-list can be changed at runtime
//! through [`filter::RuleSet`] or the HTTP management API.

pub mod api;
pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;
