//! Answer cache with TTL expiry and a bounded footprint.
//!
//! Lookups and insertions serialize through one mutex covering the index
//! and recency order; the upstream exchange on a miss happens outside it.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::dns::{Address, QueryType};
use crate::upstream::{query_upstream, ExchangeError, UpstreamTable};

/// Outcome category of a processed query, used for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Denied,
    Cache,
    Recursive,
    NxDomain,
    Failure,
}

impl Source {
    /// Two-letter tag printed in monitor lines.
    pub fn tag(self) -> &'static str {
        match self {
            Source::Denied => "DE",
            Source::Cache => "CA",
            Source::Recursive => "RE",
            Source::NxDomain => "NX",
            Source::Failure => "FA",
        }
    }
}

/// Result of resolving a name through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from a live cache entry.
    Cached { address: Address, upstream: String },
    /// Fetched from an upstream and cached.
    Recursive { address: Address, upstream: String },
    /// The upstream denied the name's existence; not cached.
    NxDomain,
    /// Timeout, network error, or unusable reply; not cached.
    Failure,
}

impl Resolution {
    pub fn source(&self) -> Source {
        match self {
            Resolution::Cached { .. } => Source::Cache,
            Resolution::Recursive { .. } => Source::Recursive,
            Resolution::NxDomain => Source::NxDomain,
            Resolution::Failure => Source::Failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    name: String,
    qtype: QueryType,
}

struct Entry {
    address: Address,
    upstream: String,
    expires_at: Instant,
    last_used: u64,
}

struct Index {
    entries: FxHashMap<Key, Entry>,
    /// Monotonic access counter backing the recency order.
    tick: u64,
}

/// Bounded (name, qtype) → address cache backed by the upstream table.
pub struct AnswerCache {
    index: Mutex<Index>,
    table: UpstreamTable,
    limit: usize,
    max_ttl: Duration,
}

impl AnswerCache {
    pub fn new(table: UpstreamTable, limit: usize, max_ttl: Duration) -> Self {
        Self {
            index: Mutex::new(Index {
                entries: FxHashMap::default(),
                tick: 0,
            }),
            table,
            limit,
            max_ttl,
        }
    }

    /// Resolve `name` for `qtype`: from a live cache entry if present,
    /// otherwise through the routed upstream (caching the answer).
    pub fn resolve(&self, name: &str, qtype: QueryType) -> Resolution {
        let key = Key {
            name: name.to_ascii_lowercase(),
            qtype,
        };
        let now = Instant::now();

        {
            let mut index = self.lock();
            index.tick += 1;
            let tick = index.tick;
            let expired = match index.entries.get_mut(&key) {
                Some(entry) if now < entry.expires_at => {
                    entry.last_used = tick;
                    return Resolution::Cached {
                        address: entry.address,
                        upstream: entry.upstream.clone(),
                    };
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                index.entries.remove(&key);
            }
        }

        let upstream = self.table.route(&key.name);
        match query_upstream(upstream, &key.name, qtype) {
            Ok((address, record_ttl)) => {
                let resolution = Resolution::Recursive {
                    address,
                    upstream: upstream.name.clone(),
                };
                self.insert(key, address, upstream.name.clone(), record_ttl, now);
                resolution
            }
            Err(ExchangeError::NxDomain) => Resolution::NxDomain,
            Err(_) => Resolution::Failure,
        }
    }

    fn insert(&self, key: Key, address: Address, upstream: String, record_ttl: u32, now: Instant) {
        // a zero limit disables caching entirely
        if self.limit == 0 {
            return;
        }
        let ttl = self.effective_ttl(record_ttl);
        let mut index = self.lock();
        index.tick += 1;
        let tick = index.tick;
        if !index.entries.contains_key(&key) && index.entries.len() >= self.limit {
            self.evict(&mut index, now);
        }
        index.entries.insert(
            key,
            Entry {
                address,
                upstream,
                expires_at: now + ttl,
                last_used: tick,
            },
        );
    }

    /// Record TTLs of zero or above the configured maximum fall back to it.
    fn effective_ttl(&self, record_ttl: u32) -> Duration {
        let record = Duration::from_secs(u64::from(record_ttl));
        if record_ttl == 0 || record > self.max_ttl {
            self.max_ttl
        } else {
            record
        }
    }

    /// Make room for one insertion: expired entries go first, then the
    /// least recently used.
    fn evict(&self, index: &mut Index, now: Instant) {
        index.entries.retain(|_, entry| now < entry.expires_at);
        while index.entries.len() >= self.limit {
            let oldest = index
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => index.entries.remove(&key),
                None => break,
            };
        }
    }

    /// Drop every entry.
    pub fn reset(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a human-readable listing of live entries to `path`.
    pub fn dump(&self, path: &Path) -> io::Result<()> {
        let index = self.lock();
        let now = Instant::now();
        let mut out = BufWriter::new(File::create(path)?);
        for (key, entry) in &index.entries {
            if now >= entry.expires_at {
                continue;
            }
            let remaining = entry.expires_at - now;
            writeln!(
                out,
                "{:<40}  {:<5}  {:<40}  {:<10}  expires in {}s",
                key.name,
                key.qtype.to_string(),
                entry.address.to_string(),
                entry.upstream,
                remaining.as_secs(),
            )?;
        }
        out.flush()
    }

    pub fn upstreams(&self) -> &UpstreamTable {
        &self.table
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}
