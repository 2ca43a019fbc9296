//! DNS message parsing and construction.
//!
//! Only the header and question section are decoded. Everything after the
//! questions is carried along in the raw bytes, which is all a forwarding
//! relay needs: the question drives classification and the raw bytes are
//! what gets sent upstream.

use std::net::Ipv4Addr;

use crate::config::BlockPolicy;
use crate::error::DecodeError;

pub const HEADER_LEN: usize = 12;

/// Maximum wire length of a domain name (RFC 1035 section 2.3.4).
const MAX_NAME_LEN: usize = 255;

pub const TYPE_A: u16 = 1;
pub const TYPE_AAAA: u16 = 28;
pub const CLASS_IN: u16 = 1;

const FLAG_QR: u16 = 0x8000;
const OPCODE_MASK: u16 = 0x7800;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const FLAG_CD: u16 = 0x0010;
const RCODE_MASK: u16 = 0x000F;

/// Pointer to the first question name, which always sits right after the header.
const QNAME_POINTER: [u8; 2] = [0xC0, 0x0C];

/// Response codes the relay produces or inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Rcode {
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NxDomain = 3,
    NotImp = 4,
    Refused = 5,
}

/// Error replies that may come back with an empty question section.
const QUESTIONLESS_RCODES: [Rcode; 4] =
    [Rcode::FormErr, Rcode::ServFail, Rcode::NotImp, Rcode::Refused];

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    /// Labels joined by dots, original case, no trailing dot. The root is "".
    /// Dots and backslashes inside a label are escaped with a backslash.
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuestion {
    /// Presentation form with the trailing dot, e.g. `example.com.`.
    pub fn fqdn(&self) -> String {
        format!("{}.", self.domain)
    }
}

/// A decoded DNS message: header fields, questions and the original bytes.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    questions: Vec<DnsQuestion>,
    raw: Vec<u8>,
    question_end: usize,
}

impl DnsMessage {
    /// Parse a DNS query from raw bytes.
    ///
    /// Fails on anything that cannot be trusted as a query: a short header,
    /// a truncated or malformed question section, or no question at all.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let msg = Self::decode(data)?;
        if msg.questions.is_empty() {
            return Err(DecodeError::NoQuestion);
        }
        Ok(msg)
    }

    /// Parse an upstream reply. Unlike a query, a reply may carry no question.
    pub fn parse_reply(data: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(data)
    }

    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::TruncatedHeader(data.len()));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;

        let mut pos = HEADER_LEN;
        let mut questions = Vec::with_capacity(qdcount.min(4));

        for _ in 0..qdcount {
            let (domain, next) = read_name(data, pos)?;
            pos = next;

            // QTYPE and QCLASS
            if pos + 4 > data.len() {
                return Err(DecodeError::TruncatedQuestion(pos));
            }
            let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            pos += 4;

            questions.push(DnsQuestion {
                domain,
                qtype,
                qclass,
            });
        }

        Ok(Self {
            id,
            flags,
            questions,
            raw: data.to_vec(),
            question_end: pos,
        })
    }

    /// The first question. [`DnsMessage::parse`] guarantees there is one.
    pub fn question(&self) -> &DnsQuestion {
        &self.questions[0]
    }

    pub fn questions(&self) -> &[DnsQuestion] {
        &self.questions
    }

    /// The bytes this message was parsed from.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    /// Check that `reply` answers this query: same id, QR set, same
    /// questions. Returns the first part that does not match.
    ///
    /// FORMERR, SERVFAIL, NOTIMP and REFUSED replies may omit the questions.
    pub fn match_reply(&self, reply: &DnsMessage) -> Result<(), &'static str> {
        if reply.id != self.id {
            return Err("transaction id");
        }
        if !reply.is_response() {
            return Err("QR flag");
        }
        let bare_error = QUESTIONLESS_RCODES.iter().any(|&r| r as u8 == reply.rcode());
        if reply.questions.is_empty() && bare_error {
            return Ok(());
        }

        let same_questions = reply.questions.len() == self.questions.len()
            && reply.questions.iter().zip(&self.questions).all(|(a, b)| {
                a.qtype == b.qtype
                    && a.qclass == b.qclass
                    && a.domain.eq_ignore_ascii_case(&b.domain)
            });
        if !same_questions {
            return Err("question section");
        }
        Ok(())
    }

    /// Build the local answer for a blocked name.
    ///
    /// A queries get one A record pointing at the block address, every other
    /// type gets NXDOMAIN.
    pub fn blocked_response(&self, policy: &BlockPolicy) -> Vec<u8> {
        if self.question().qtype == TYPE_A {
            DnsResponse::reply_to(self, Rcode::NoError)
                .with_answer(DnsRecord::a(policy.address, policy.ttl))
                .to_bytes()
        } else {
            DnsResponse::reply_to(self, Rcode::NxDomain).to_bytes()
        }
    }

    /// Build the SERVFAIL sent when the upstream exchange fails.
    pub fn servfail_response(&self) -> Vec<u8> {
        DnsResponse::reply_to(self, Rcode::ServFail).to_bytes()
    }

    fn question_section(&self) -> &[u8] {
        &self.raw[HEADER_LEN..self.question_end]
    }
}

/// Read a possibly compressed domain name starting at `pos`.
///
/// Returns the name and the offset just past it in the original stream.
/// Pointers may only point backwards, and together with the name length
/// limit that guarantees termination on hostile input.
fn read_name(data: &[u8], mut pos: usize) -> Result<(String, usize), DecodeError> {
    let mut name = String::new();
    let mut wire_len = 1;
    let mut end = None;

    loop {
        let len = *data.get(pos).ok_or(DecodeError::TruncatedQuestion(pos))? as usize;

        match len & 0xC0 {
            0x00 if len == 0 => {
                return Ok((name, end.unwrap_or(pos + 1)));
            }
            0x00 => {
                let label = data
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(DecodeError::TruncatedQuestion(pos))?;

                wire_len += len + 1;
                if wire_len > MAX_NAME_LEN {
                    return Err(DecodeError::NameTooLong);
                }

                if !name.is_empty() {
                    name.push('.');
                }
                for c in String::from_utf8_lossy(label).chars() {
                    if c == '.' || c == '\\' {
                        name.push('\\');
                    }
                    name.push(c);
                }
                pos += 1 + len;
            }
            0xC0 => {
                let low = *data.get(pos + 1).ok_or(DecodeError::TruncatedQuestion(pos))?;
                let target = ((len & 0x3F) << 8) | low as usize;
                if target >= pos {
                    return Err(DecodeError::BadPointer(pos));
                }
                end.get_or_insert(pos + 2);
                pos = target;
            }
            _ => return Err(DecodeError::InvalidLabel(pos)),
        }
    }
}

/// A DNS response built by the relay.
///
/// The question section is copied byte for byte from the query so that it
/// is echoed exactly, and any compression pointers inside it stay valid.
#[derive(Debug, Clone)]
pub struct DnsResponse<'a> {
    pub id: u16,
    pub flags: u16,
    qdcount: u16,
    question: &'a [u8],
    pub answers: Vec<DnsRecord>,
}

/// A DNS resource record owned by the first question name.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsRecord {
    pub fn a(address: Ipv4Addr, ttl: u32) -> Self {
        Self {
            rtype: TYPE_A,
            class: CLASS_IN,
            ttl,
            rdata: address.octets().to_vec(),
        }
    }
}

impl<'a> DnsResponse<'a> {
    /// Start a response to `query` with the given rcode and no answers.
    ///
    /// Copies opcode, RD and CD from the query and sets QR and RA.
    pub fn reply_to(query: &'a DnsMessage, rcode: Rcode) -> Self {
        let flags = FLAG_QR
            | FLAG_RA
            | (query.flags & (OPCODE_MASK | FLAG_RD | FLAG_CD))
            | rcode as u16;

        Self {
            id: query.id,
            flags,
            qdcount: query.questions.len() as u16,
            question: query.question_section(),
            answers: Vec::new(),
        }
    }

    pub fn with_answer(mut self, record: DnsRecord) -> Self {
        self.answers.push(record);
        self
    }

    /// Encode the response to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.question.len() + 16 * self.answers.len());

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&self.qdcount.to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        data.extend_from_slice(self.question);

        for a in &self.answers {
            data.extend_from_slice(&QNAME_POINTER);
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }
}

/// Encode a standard recursive query for `domain`.
pub fn build_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + domain.len() + 6);

    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&FLAG_RD.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    for label in domain.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0x00);

    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    packet
}
