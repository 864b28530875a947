//! Segment trie for static routes.
//!
//! Each edge consumes one literal path segment, so a lookup costs
//! O(number of segments) regardless of how many routes are registered.
//! A node is terminal iff at least one static route ends there; terminals
//! hold one entry per HTTP method.
//!
//! Routes containing placeholders never enter the trie; they live in the
//! per-method ordered lists owned by [`Router`](super::Router).

use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

/// Node in the static segment trie
#[derive(Debug)]
pub(crate) struct TrieNode<V> {
    /// Child nodes keyed by literal segment text
    children: HashMap<Box<str>, TrieNode<V>>,
    /// Static routes terminating at this node, by method
    routes: HashMap<Method, Arc<V>>,
}

impl<V> Default for TrieNode<V> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            routes: HashMap::new(),
        }
    }
}

impl<V> TrieNode<V> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert `value` at the node reached by `segments`.
    ///
    /// Returns the already-registered value if `(method, path)` is taken;
    /// the trie is left untouched in that case.
    pub(crate) fn insert<'a, I>(&mut self, segments: I, method: Method, value: Arc<V>) -> Result<(), Arc<V>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut node = self;
        for seg in segments {
            node = node.children.entry(Box::from(seg)).or_default();
        }
        if let Some(existing) = node.routes.get(&method) {
            return Err(Arc::clone(existing));
        }
        node.routes.insert(method, value);
        Ok(())
    }

    /// Walk the trie and return the terminal's routes.
    ///
    /// `None` when the walk falls off the trie or ends on a non-terminal node.
    pub(crate) fn lookup<'a, I>(&self, segments: I) -> Option<&HashMap<Method, Arc<V>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut node = self;
        for seg in segments {
            node = node.children.get(seg)?;
        }
        if node.routes.is_empty() {
            None
        } else {
            Some(&node.routes)
        }
    }

    /// Number of nodes including this one
    pub(crate) fn node_count(&self) -> usize {
        1 + self.children.values().map(TrieNode::node_count).sum::<usize>()
    }
}
