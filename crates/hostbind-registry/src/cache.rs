//! Per-host-type resolution cache.
//!
//! Resolving the registered native roots of a host type walks its whole base
//! graph. Host types are never redefined, so the result is computed once and
//! kept for as long as the cache lives. Entries are keyed by [`HostTypeId`],
//! which is never reused.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use hostbind_core::HostTypeId;

/// Cached ordered roots per host type.
pub struct ResolutionCache<D> {
    roots: FxHashMap<HostTypeId, Arc<[Arc<D>]>>,
}

impl<D> Default for ResolutionCache<D> {
    fn default() -> Self {
        Self {
            roots: FxHashMap::default(),
        }
    }
}

impl<D> ResolutionCache<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host_type: HostTypeId) -> Option<Arc<[Arc<D>]>> {
        self.roots.get(&host_type).cloned()
    }

    /// Store the roots of `host_type`. The first stored value wins, so a
    /// concurrent resolution of the same type observes one stable order.
    pub fn insert(&mut self, host_type: HostTypeId, roots: Vec<Arc<D>>) -> Arc<[Arc<D>]> {
        self.roots
            .entry(host_type)
            .or_insert_with(|| roots.into())
            .clone()
    }

    /// Forget a single entry.
    pub fn invalidate(&mut self, host_type: HostTypeId) {
        self.roots.remove(&host_type);
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }
}
