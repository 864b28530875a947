//! Dependency value caches, keyed by provider identity.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::executor::CallableId;

/// Per-request cache.
///
/// Each provider gets one `OnceCell`, so concurrent siblings asking for the
/// same provider wait on a single invocation. Create one per request;
/// clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct RequestCache {
    cells: Arc<DashMap<CallableId, Arc<OnceCell<Value>>>>,
}

impl RequestCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `id`, created on first use
    #[must_use]
    pub fn cell(&self, id: CallableId) -> Arc<OnceCell<Value>> {
        Arc::clone(self.cells.entry(id).or_default().value())
    }

    /// Value already resolved for `id`
    #[must_use]
    pub fn get(&self, id: CallableId) -> Option<Value> {
        self.cells.get(&id).and_then(|c| c.get().cloned())
    }

    /// Number of providers with a slot
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// `true` when nothing was cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Process-wide cache for [`CacheScope::Process`] dependencies.
///
/// Filled with check-then-set: two requests missing at the same moment may
/// both invoke the provider; the first value stored wins and later readers
/// all see it.
///
/// [`CacheScope::Process`]: super::CacheScope::Process
#[derive(Debug, Default)]
pub struct ProcessCache {
    values: DashMap<CallableId, Value>,
}

impl ProcessCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for a provider
    #[must_use]
    pub fn get(&self, id: CallableId) -> Option<Value> {
        self.values.get(&id).map(|v| v.value().clone())
    }

    /// Store `value` unless a value is already present; returns the stored value
    pub fn insert_if_absent(&self, id: CallableId, value: Value) -> Value {
        self.values.entry(id).or_insert(value).value().clone()
    }

    /// Drop the value for one provider
    pub fn invalidate(&self, id: CallableId) -> Option<Value> {
        self.values.remove(&id).map(|(_, v)| v)
    }

    /// Drop everything
    pub fn clear(&self) {
        self.values.clear();
    }

    /// Number of cached providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
