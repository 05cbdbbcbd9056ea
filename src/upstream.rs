//! Upstream resolver table and the synchronous query exchange.
//!
//! Every query routes to the default upstream unless one of the configured
//! target suffixes matches, in which case the owning upstream is used. The
//! exchange itself is one datagram out, one datagram back, on an ephemeral
//! socket with a bounded read timeout.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::dns::{
    self, Address, Header, Message, QueryType, Question, WireError, CLASS_IN, FLAG_RD,
    MAX_PACKET_SIZE, RCODE_NOERROR, RCODE_NXDOMAIN,
};
use crate::tree::{AddOutcome, NameTree};

/// How long to wait for an upstream reply.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// One configured recursive resolver.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub name: String,
    pub addr: SocketAddr,
    /// Domain suffixes routed here; empty marks the default upstream.
    pub targets: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("no default upstream configured (exactly one entry must have no targets)")]
    MissingDefaultUpstream,
    #[error("invalid target suffix '{0}'")]
    InvalidTarget(String),
}

/// Routing table mapping query names to upstreams.
pub struct UpstreamTable {
    upstreams: Vec<Upstream>,
    targets: NameTree<usize>,
    default_index: usize,
}

impl UpstreamTable {
    pub fn new(upstreams: Vec<Upstream>) -> Result<Self, TableError> {
        let mut targets = NameTree::new();
        let mut default_index = None;
        for (index, upstream) in upstreams.iter().enumerate() {
            if upstream.targets.is_empty() {
                if default_index.is_none() {
                    default_index = Some(index);
                }
                continue;
            }
            for target in &upstream.targets {
                // Duplicated keeps the earlier registration
                if targets.add(target, index) == AddOutcome::Invalid {
                    return Err(TableError::InvalidTarget(target.clone()));
                }
            }
        }
        let default_index = default_index.ok_or(TableError::MissingDefaultUpstream)?;
        Ok(Self {
            upstreams,
            targets,
            default_index,
        })
    }

    /// Upstream responsible for `name`: the owner of the longest matching
    /// target suffix, or the default.
    pub fn route(&self, name: &str) -> &Upstream {
        match self.targets.find(&name.to_ascii_lowercase()) {
            Some(&index) => &self.upstreams[index],
            None => &self.upstreams[self.default_index],
        }
    }

    pub fn entries(&self) -> &[Upstream] {
        &self.upstreams
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("upstream returned NXDOMAIN")]
    NxDomain,
    #[error("upstream did not answer in time")]
    Timeout,
    #[error("upstream reply did not match the query")]
    Mismatch,
    #[error("upstream returned no usable answer")]
    NoAnswer,
    #[error("malformed upstream reply")]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Send one query to `upstream` and wait for the matching reply.
///
/// Returns the first answer of the requested type together with its TTL.
pub fn query_upstream(
    upstream: &Upstream,
    qname: &str,
    qtype: QueryType,
) -> Result<(Address, u32), ExchangeError> {
    // the unspecified bind must match the upstream's address family
    let socket = match upstream.addr {
        SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
        SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
    };
    socket.set_read_timeout(Some(EXCHANGE_TIMEOUT))?;

    let id: u16 = rand::rng().random();
    let query = Message {
        header: Header {
            id,
            flags: FLAG_RD,
            qdcount: 1,
            ..Header::default()
        },
        questions: vec![Question {
            qname: qname.to_string(),
            qtype,
            qclass: CLASS_IN,
        }],
        answers: Vec::new(),
    };

    let mut buf = [0u8; MAX_PACKET_SIZE];
    let len = dns::encode(&query, &mut buf)?;
    socket.send_to(&buf[..len], upstream.addr)?;

    let (len, _) = socket.recv_from(&mut buf).map_err(|e| {
        if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
            ExchangeError::Timeout
        } else {
            ExchangeError::Io(e)
        }
    })?;
    let reply = dns::decode(&buf[..len])?;

    if reply.header.id != id {
        return Err(ExchangeError::Mismatch);
    }
    let question_matches = reply
        .questions
        .first()
        .is_some_and(|q| q.qtype == qtype && q.qname.eq_ignore_ascii_case(qname));
    if !question_matches {
        return Err(ExchangeError::Mismatch);
    }
    match reply.header.rcode() {
        RCODE_NOERROR => {}
        RCODE_NXDOMAIN => return Err(ExchangeError::NxDomain),
        _ => return Err(ExchangeError::NoAnswer),
    }

    reply
        .answers
        .iter()
        .find(|answer| answer.rtype == qtype)
        .map(|answer| (answer.rdata, answer.ttl))
        .ok_or(ExchangeError::NoAnswer)
}
