//! Error types shared across the relay.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Reasons a datagram could not be decoded as a DNS query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message shorter than the 12-byte header ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("question section truncated at offset {0}")]
    TruncatedQuestion(usize),

    #[error("label at offset {0} uses a reserved length encoding")]
    InvalidLabel(usize),

    #[error("domain name exceeds 255 bytes")]
    NameTooLong,

    #[error("compression pointer at offset {0} does not point backwards")]
    BadPointer(usize),

    #[error("message carries no question")]
    NoQuestion,
}

/// Failures of a single upstream exchange. All of them map to SERVFAIL.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("upstream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("upstream did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("upstream reply is malformed: {0}")]
    Malformed(#[from] DecodeError),

    #[error("upstream reply does not match the query: {0}")]
    Mismatch(&'static str),
}

/// Errors raised by the rule set and its backing source.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rule source {} unavailable: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid rule: {0:?}")]
    Invalid(String),
}
