//! Engine lifecycle and the UDP receive loop.
//!
//! The engine owns the socket, the worker pool, the cache, the rule trees,
//! and the upstream table. The receive loop runs on the calling thread;
//! workers drain the job queue until `finish` is requested.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::cache::AnswerCache;
use crate::config::Config;
use crate::dns::{self, Message, QueryType, FLAG_QR, MAX_PACKET_SIZE, RCODE_REFUSED};
use crate::filter::{Filter, Verdict};
use crate::monitor::{Event, Monitor};
use crate::queue::{Job, JobQueue};
use crate::upstream::{TableError, Upstream, UpstreamTable};
use crate::worker;

/// Size of the worker pool.
pub const NUM_THREADS: usize = 4;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid port number {0}")]
    InvalidPort(u32),
    #[error("invalid upstream address '{0}'")]
    InvalidUpstream(String),
    #[error("unable to bind {0}: {1}")]
    Bind(String, #[source] io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("unable to load rules: {0}")]
    Rules(#[source] io::Error),
}

pub struct Engine {
    socket: UdpSocket,
    queue: JobQueue,
    cache: AnswerCache,
    filter: RwLock<Filter>,
    monitor: Monitor,
    running: AtomicBool,
    filtering: AtomicBool,
    heuristics: AtomicBool,
    ipv6: bool,
    blacklist_paths: Vec<String>,
    whitelist_paths: Vec<String>,
    dump_path: PathBuf,
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, EngineError> {
        if config.binding.port > 65535 {
            return Err(EngineError::InvalidPort(config.binding.port));
        }
        let bind_addr = format!("{}:{}", config.binding.address, config.binding.port);
        let socket =
            UdpSocket::bind(&bind_addr).map_err(|e| EngineError::Bind(bind_addr.clone(), e))?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|e| EngineError::Bind(bind_addr, e))?;

        let mut upstreams = Vec::with_capacity(config.external_dns.len());
        for entry in &config.external_dns {
            let addr = parse_upstream_addr(&entry.address)
                .ok_or_else(|| EngineError::InvalidUpstream(entry.address.clone()))?;
            upstreams.push(Upstream {
                name: entry.name.clone(),
                addr,
                targets: entry.targets.clone(),
            });
        }
        let table = UpstreamTable::new(upstreams)?;
        let cache = AnswerCache::new(
            table,
            config.cache.limit,
            Duration::from_secs(config.cache.ttl),
        );

        let filter =
            Filter::load(&config.blacklist, &config.whitelist).map_err(EngineError::Rules)?;

        Ok(Self {
            socket,
            queue: JobQueue::new(),
            cache,
            filter: RwLock::new(filter),
            monitor: Monitor::new(config.monitor_mask()),
            running: AtomicBool::new(false),
            filtering: AtomicBool::new(true),
            heuristics: AtomicBool::new(config.use_heuristics),
            ipv6: config.ipv6,
            blacklist_paths: config.blacklist.clone(),
            whitelist_paths: config.whitelist.clone(),
            dump_path: PathBuf::from(&config.dump_path),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the receive loop on the calling thread with the worker pool
    /// alongside. Returns once `finish` has been observed.
    pub fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        thread::scope(|scope| {
            for _ in 0..NUM_THREADS {
                scope.spawn(|| worker::run(self));
            }
            self.receive_loop();
            // also reached on a fatal receive error; workers must stop too
            self.running.store(false, Ordering::SeqCst);
            self.queue.notify_all();
        });
    }

    fn receive_loop(&self) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        while self.running.load(Ordering::SeqCst) {
            let (len, endpoint) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                // idle; gives finish() a chance to be observed
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    eprintln!("receive error: {e}");
                    break;
                }
            };

            let request = match dns::decode(&buf[..len]) {
                Ok(message) => message,
                // unparseable datagrams get no reply
                Err(_) => continue,
            };

            if request.questions.len() != 1 {
                self.send_error(&request, RCODE_REFUSED, endpoint);
                continue;
            }
            if !self.allowed_qtype(request.questions[0].qtype) {
                self.send_error(&request, RCODE_REFUSED, endpoint);
                continue;
            }

            self.queue.push(Job::new(endpoint, request));
        }
    }

    fn allowed_qtype(&self, qtype: QueryType) -> bool {
        match qtype {
            QueryType::A => true,
            QueryType::Aaaa => self.ipv6,
            QueryType::Other(_) => false,
        }
    }

    /// Error response preserving the request id and echoing its question.
    /// Requests without a parsed question are dropped instead.
    pub(crate) fn send_error(&self, request: &Message, rcode: u8, endpoint: SocketAddr) {
        let Some(question) = request.questions.first() else {
            return;
        };
        let mut response = Message::default();
        response.header.id = request.header.id;
        response.header.flags = FLAG_QR;
        response.header.set_rcode(rcode);
        response.header.qdcount = 1;
        response.questions.push(question.clone());
        self.send(&response, endpoint);
    }

    pub(crate) fn send(&self, response: &Message, endpoint: SocketAddr) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        match dns::encode(response, &mut buf) {
            Ok(len) => {
                let _ = self.socket.send_to(&buf[..len], endpoint);
            }
            Err(e) => eprintln!("dropping response for {endpoint}: {e}"),
        }
    }

    /// Request the receive loop and workers to stop. Both observe the flag
    /// within their receive/wait timeouts.
    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.notify_all();
    }

    pub(crate) fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Policy verdict for a lowercased query name.
    pub(crate) fn verdict(&self, name: &str) -> Verdict {
        if !self.filtering.load(Ordering::Relaxed) {
            return Verdict::Allow;
        }
        self.filter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .verdict(name, self.heuristics.load(Ordering::Relaxed))
    }

    pub(crate) fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub(crate) fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub(crate) fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    // ── administrative interface (console collaborator) ──

    /// Re-read the rule files and swap the trees in; the cache is reset.
    /// When any file fails to load the previous trees are kept.
    pub fn reload(&self) -> io::Result<()> {
        let filter = Filter::load(&self.blacklist_paths, &self.whitelist_paths)?;
        *self.filter.write().unwrap_or_else(|e| e.into_inner()) = filter;
        self.cache.reset();
        Ok(())
    }

    pub fn set_filtering(&self, enabled: bool) {
        self.filtering.store(enabled, Ordering::Relaxed);
    }

    pub fn filtering(&self) -> bool {
        self.filtering.load(Ordering::Relaxed)
    }

    pub fn set_heuristics(&self, enabled: bool) {
        self.heuristics.store(enabled, Ordering::Relaxed);
    }

    pub fn heuristics(&self) -> bool {
        self.heuristics.load(Ordering::Relaxed)
    }

    /// Write the cache contents to the configured dump path.
    pub fn dump(&self) -> io::Result<()> {
        self.cache.dump(&self.dump_path)
    }

    /// Snapshot of the recent-event buffer (status-page collaborator).
    pub fn recent_events(&self) -> Vec<Event> {
        self.monitor.recent()
    }
}

fn parse_upstream_addr(address: &str) -> Option<SocketAddr> {
    if let Ok(addr) = address.parse() {
        return Some(addr);
    }
    address
        .parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, 53))
}
