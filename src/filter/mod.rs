//! Query filtering: whitelist, heuristic, blacklist.
//!
//! The whitelist always wins; the heuristic (when enabled) is consulted
//! before the blacklist so generated names are flagged even when no rule
//! covers them.

mod rules;

use std::io;

use crate::heuristic::is_random_label;
use crate::tree::NameTree;

pub use rules::log_summary;

/// Outcome of the policy check for one query name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block { by_heuristic: bool },
}

/// The blacklist/whitelist pair loaded from rule files.
pub struct Filter {
    blacklist: NameTree<()>,
    whitelist: NameTree<()>,
}

impl Filter {
    /// Load both rule sets. Any unreadable file fails the whole load.
    pub fn load(blacklist_paths: &[String], whitelist_paths: &[String]) -> io::Result<Self> {
        let mut blacklist = NameTree::new();
        rules::load_rules(blacklist_paths, &mut blacklist)?;
        rules::log_summary("blacklist", &blacklist);

        let mut whitelist = NameTree::new();
        rules::load_rules(whitelist_paths, &mut whitelist)?;
        rules::log_summary("whitelist", &whitelist);

        Ok(Self {
            blacklist,
            whitelist,
        })
    }

    /// Decide whether `name` (lowercase) is denied.
    pub fn verdict(&self, name: &str, use_heuristics: bool) -> Verdict {
        if self.whitelist.matches(name) {
            return Verdict::Allow;
        }
        if use_heuristics && is_random_label(name) {
            return Verdict::Block { by_heuristic: true };
        }
        if self.blacklist.matches(name) {
            return Verdict::Block {
                by_heuristic: false,
            };
        }
        Verdict::Allow
    }
}
