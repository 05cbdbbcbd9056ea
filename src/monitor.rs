//! Per-query monitor lines and the recent-event buffer.

use std::collections::VecDeque;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use crate::cache::Source;
use crate::dns::QueryType;

pub const SHOW_DENIED: u32 = 1 << 0;
pub const SHOW_CACHE: u32 = 1 << 1;
pub const SHOW_RECURSIVE: u32 = 1 << 2;
pub const SHOW_FAILURE: u32 = 1 << 3;
pub const SHOW_NXDOMAIN: u32 = 1 << 4;
pub const SHOW_ALL: u32 = SHOW_DENIED | SHOW_CACHE | SHOW_RECURSIVE | SHOW_FAILURE | SHOW_NXDOMAIN;

/// How many events the buffer retains for the status page.
const MAX_EVENTS: usize = 1000;

const COLOR_RED: &str = "\x1b[31m";
const COLOR_YELLOW: &str = "\x1b[33m";
const COLOR_RESET: &str = "\x1b[39m";

/// Mask bit for one outcome category.
pub fn category(source: Source) -> u32 {
    match source {
        Source::Denied => SHOW_DENIED,
        Source::Cache => SHOW_CACHE,
        Source::Recursive => SHOW_RECURSIVE,
        Source::Failure => SHOW_FAILURE,
        Source::NxDomain => SHOW_NXDOMAIN,
    }
}

/// Mask bit for a category name used in the configuration file.
pub fn category_from_name(name: &str) -> Option<u32> {
    match name {
        "denied" => Some(SHOW_DENIED),
        "cache" => Some(SHOW_CACHE),
        "recursive" => Some(SHOW_RECURSIVE),
        "failure" => Some(SHOW_FAILURE),
        "nxdomain" => Some(SHOW_NXDOMAIN),
        _ => None,
    }
}

/// One processed query, retained for the status page.
#[derive(Debug, Clone)]
pub struct Event {
    pub time: SystemTime,
    pub client: SocketAddr,
    pub source: Source,
    pub upstream: String,
    pub address: String,
    pub host: String,
}

/// Prints monitor lines for the categories selected by the mask and keeps
/// the last [`MAX_EVENTS`] events regardless of it.
pub struct Monitor {
    mask: u32,
    color: bool,
    events: Mutex<VecDeque<Event>>,
}

impl Monitor {
    pub fn new(mask: u32) -> Self {
        Self {
            mask,
            color: std::io::stdout().is_terminal(),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one query outcome.
    pub fn record(&self, event: Event, qtype: QueryType, by_heuristic: bool) {
        if self.mask & category(event.source) != 0 {
            self.print(&event, qtype, by_heuristic);
        }
        self.push(event);
    }

    fn print(&self, event: &Event, qtype: QueryType, by_heuristic: bool) {
        let color = if !self.color {
            ""
        } else {
            match event.source {
                Source::Denied => COLOR_RED,
                Source::Failure | Source::NxDomain => COLOR_YELLOW,
                Source::Cache | Source::Recursive => "",
            }
        };
        let reset = if color.is_empty() { "" } else { COLOR_RESET };
        let marker = if qtype == QueryType::Aaaa { '6' } else { '4' };
        let upstream = if by_heuristic { "*" } else { event.upstream.as_str() };
        println!(
            "{color}{:<21}  {} {marker}  {:<10}  {:<15}  {}{reset}",
            event.client.to_string(),
            event.source.tag(),
            upstream,
            event.address,
            event.host,
        );
    }

    /// Snapshot of the retained events, oldest first.
    pub fn recent(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }

    fn push(&self, event: Event) {
        let mut events = self.lock();
        while events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}
