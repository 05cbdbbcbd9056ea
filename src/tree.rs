//! Suffix-matching tree over domain names.
//!
//! Names are keyed by their label sequence in reverse, so a longest-suffix
//! match is a walk from the root. Matching is label-aligned: a rule for
//! `tracker.net` matches `a.tracker.net` but not `badtracker.net`.

use rustc_hash::FxHashMap;

/// Result of inserting one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicated,
    Invalid,
}

struct Node<T> {
    children: FxHashMap<String, Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            children: FxHashMap::default(),
            value: None,
        }
    }
}

/// A set of domain-name suffixes, each carrying a tag.
///
/// Stored names are lowercased on insert; lookups assume the input is
/// already lowercase ASCII (callers normalize once at the boundary).
pub struct NameTree<T> {
    root: Node<T>,
    size: usize,
}

impl<T> NameTree<T> {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            size: 0,
        }
    }

    /// Insert `name` with `value`. A name already present keeps its original
    /// value and reports `Duplicated`.
    pub fn add(&mut self, name: &str, value: T) -> AddOutcome {
        if !is_valid_name(name) {
            return AddOutcome::Invalid;
        }
        let mut node = &mut self.root;
        for label in name.split('.').rev() {
            node = node
                .children
                .entry(label.to_ascii_lowercase())
                .or_insert_with(Node::new);
        }
        if node.value.is_some() {
            return AddOutcome::Duplicated;
        }
        node.value = Some(value);
        self.size += 1;
        AddOutcome::Added
    }

    /// Tag of the longest stored suffix of `name`, if any.
    pub fn find(&self, name: &str) -> Option<&T> {
        let mut node = &self.root;
        let mut found = None;
        for label in name.split('.').rev() {
            match node.children.get(label) {
                Some(child) => {
                    node = child;
                    if node.value.is_some() {
                        found = node.value.as_ref();
                    }
                }
                None => break,
            }
        }
        found
    }

    /// Whether any stored suffix matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Number of stored names.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Rough heap footprint, for the load-time log line.
    pub fn memory_estimate(&self) -> usize {
        node_memory(&self.root)
    }

    pub fn clear(&mut self) {
        self.root = Node::new();
        self.size = 0;
    }
}

impl<T> Default for NameTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn node_memory<T>(node: &Node<T>) -> usize {
    let mut total = std::mem::size_of::<Node<T>>();
    for (label, child) in &node.children {
        total += label.capacity() + node_memory(child);
    }
    total
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}
