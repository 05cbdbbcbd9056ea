//! Worker loop: policy check, resolution, response synthesis.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime};

use crate::cache::{Resolution, Source};
use crate::dns::{
    Address, Message, QueryType, Record, FLAG_QR, FLAG_RA, FLAG_RD, RCODE_NXDOMAIN, RCODE_SERVFAIL,
};
use crate::engine::Engine;
use crate::filter::Verdict;
use crate::monitor::Event;
use crate::queue::Job;

/// Address answered for blocked A queries.
pub const BLOCKED_IPV4: Ipv4Addr = Ipv4Addr::LOCALHOST;
/// Address answered for blocked AAAA queries.
pub const BLOCKED_IPV6: Ipv6Addr = Ipv6Addr::LOCALHOST;
/// TTL of synthesized answers.
pub const ANSWER_TTL: u32 = 300;

const IDLE_WAIT: Duration = Duration::from_secs(1);

pub(crate) fn run(engine: &Engine) {
    while engine.running() {
        match engine.queue().pop() {
            Some(job) => handle(engine, job),
            None => engine.queue().wait(IDLE_WAIT),
        }
    }
}

fn handle(engine: &Engine, job: Job) {
    // the receiver only enqueues single-question requests
    let Some(question) = job.request.questions.first() else {
        return;
    };
    let qname = question.qname.to_ascii_lowercase();

    let mut by_heuristic = false;
    let mut upstream = String::new();
    let source;
    // Ok carries the answer address, Err the error rcode
    let resolved: Result<Address, u8>;

    if let Verdict::Block { by_heuristic: h } = engine.verdict(&qname) {
        by_heuristic = h;
        source = Source::Denied;
        resolved = Ok(sentinel(question.qtype));
    } else if !qname.contains('.') || !job.request.header.recursion_desired() {
        // local host names and non-recursive queries are not forwarded
        source = Source::NxDomain;
        resolved = Err(RCODE_NXDOMAIN);
    } else {
        match engine.cache().resolve(&qname, question.qtype) {
            Resolution::Cached { address, upstream: name } => {
                source = Source::Cache;
                upstream = name;
                resolved = Ok(address);
            }
            Resolution::Recursive { address, upstream: name } => {
                source = Source::Recursive;
                upstream = name;
                resolved = Ok(address);
            }
            Resolution::NxDomain => {
                source = Source::NxDomain;
                resolved = Err(RCODE_NXDOMAIN);
            }
            Resolution::Failure => {
                source = Source::Failure;
                resolved = Err(RCODE_SERVFAIL);
            }
        }
    }

    engine.monitor().record(
        Event {
            time: SystemTime::now(),
            client: job.endpoint,
            source,
            upstream,
            address: resolved.map(|a| a.to_string()).unwrap_or_default(),
            host: question.qname.clone(),
        },
        question.qtype,
        by_heuristic,
    );

    match resolved {
        Ok(address) => engine.send(&answer_response(&job.request, address), job.endpoint),
        Err(rcode) => engine.send_error(&job.request, rcode, job.endpoint),
    }
}

fn sentinel(qtype: QueryType) -> Address {
    match qtype {
        QueryType::Aaaa => Address::V6(BLOCKED_IPV6),
        _ => Address::V4(BLOCKED_IPV4),
    }
}

/// Response with the question echoed and a single answer record.
fn answer_response(request: &Message, address: Address) -> Message {
    let question = request.questions[0].clone();
    let mut response = Message::default();
    response.header.id = request.header.id;
    response.header.flags = FLAG_QR;
    if request.header.recursion_desired() {
        response.header.flags |= FLAG_RD | FLAG_RA;
    }
    response.header.qdcount = 1;
    response.header.ancount = 1;
    response.answers.push(Record {
        owner: question.qname.clone(),
        rtype: question.qtype,
        rclass: question.qclass,
        ttl: ANSWER_TTL,
        rdata: address,
    });
    response.questions.push(question);
    response
}
