//! Trie-indexed subscription registry (§4.2 "Precompile patterns to a
//! trie indexed by literal prefix to keep lookup amortized
//! O(depth + wildcard-branches)").
//!
//! Grounded on `llmspell-events::bus::EventBus`'s subscription-registry
//! shape (an id-keyed collection guarded for concurrent add/remove), with
//! a genuinely trie-structured index since the teacher's own pattern
//! matcher is a flat `Vec` scan, not a trie.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pattern::{Pattern, Segment};

/// Opaque handle returned by [`SubscriptionIndex::insert`], used to
/// [`SubscriptionIndex::remove`] later (§4.2 `remove(ref)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Default)]
struct Node<T> {
    children: HashMap<String, Node<T>>,
    single: Option<Box<Node<T>>>,
    here: Vec<(u64, T)>,
    multi: Vec<(u64, T)>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            single: None,
            here: Vec::new(),
            multi: Vec::new(),
        }
    }
}

/// A trie of compiled [`Pattern`]s mapping to values of type `T`
/// (typically a subscription reference). Supports restartable, finite
/// iteration over matches (§4.2 `findMatching`).
pub struct SubscriptionIndex<T> {
    root: Node<T>,
    paths: HashMap<u64, Pattern>,
    next_id: AtomicU64,
}

impl<T> Default for SubscriptionIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SubscriptionIndex<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            paths: HashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Index `value` under `pattern` (§4.2 `addSubscription`).
    pub fn insert(&mut self, pattern: Pattern, value: T) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut node = &mut self.root;
        for segment in &pattern.segments {
            match segment {
                Segment::Literal(lit) => {
                    node = node.children.entry(lit.clone()).or_insert_with(Node::new);
                }
                Segment::Single => {
                    node = node.single.get_or_insert_with(|| Box::new(Node::new()));
                }
                Segment::Multi => {
                    node.multi.push((id, value.clone()));
                    self.paths.insert(id, pattern);
                    return SubscriptionHandle(id);
                }
            }
        }
        node.here.push((id, value));
        self.paths.insert(id, pattern);
        SubscriptionHandle(id)
    }

    /// Remove a previously inserted subscription (§4.2 `remove(ref)`).
    ///
    /// No-op if the handle was already removed.
    pub fn remove(&mut self, handle: SubscriptionHandle) {
        let Some(pattern) = self.paths.remove(&handle.0) else {
            return;
        };
        let mut node = &mut self.root;
        for segment in &pattern.segments {
            match segment {
                Segment::Literal(lit) => {
                    let Some(next) = node.children.get_mut(lit) else {
                        return;
                    };
                    node = next;
                }
                Segment::Single => {
                    let Some(next) = node.single.as_mut() else {
                        return;
                    };
                    node = next;
                }
                Segment::Multi => {
                    node.multi.retain(|(id, _)| *id != handle.0);
                    return;
                }
            }
        }
        node.here.retain(|(id, _)| *id != handle.0);
    }

    /// Find every indexed value whose pattern matches `topic` (§4.2
    /// `findMatching(topic) -> iterable of refs`).
    #[must_use]
    pub fn find_matching(&self, topic: &str) -> Vec<T> {
        let segments: Vec<&str> = topic.split('.').collect();
        let mut out = Vec::new();
        Self::collect(&self.root, &segments, &mut out);
        out
    }

    fn collect(node: &Node<T>, topic: &[&str], out: &mut Vec<T>) {
        out.extend(node.multi.iter().map(|(_, v)| v.clone()));

        match topic.first() {
            None => {
                out.extend(node.here.iter().map(|(_, v)| v.clone()));
            }
            Some(head) => {
                if let Some(child) = node.children.get(*head) {
                    Self::collect(child, &topic[1..], out);
                }
                if let Some(single) = &node.single {
                    Self::collect(single, &topic[1..], out);
                }
            }
        }
    }

    /// Number of currently indexed subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
