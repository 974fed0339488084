//! Registered-instance index.
//!
//! Maps a native value address to the host wrappers currently exposing it, so
//! that casting the same address twice yields the same wrapper. Entries hold
//! weak references; the wrapper's own teardown removes them.

use std::fmt;

use rustc_hash::FxHashMap;

use hostbind_core::{HostObject, HostWeak, NativePtr};

/// Opaque identity of the instance record that registered an entry.
///
/// Used to remove exactly the entries an instance added, even while its
/// host object is already being destroyed and can no longer be upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceKey(pub usize);

#[derive(Clone)]
struct IndexEntry {
    wrapper: HostWeak,
    key: InstanceKey,
}

/// Multimap from native address to wrappers.
#[derive(Default)]
pub struct InstanceIndex {
    entries: FxHashMap<NativePtr, Vec<IndexEntry>>,
}

impl InstanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `wrapper` exposes the value at `addr`.
    pub fn register(&mut self, addr: NativePtr, wrapper: HostWeak, key: InstanceKey) {
        self.entries
            .entry(addr)
            .or_default()
            .push(IndexEntry { wrapper, key });
    }

    /// Remove the entry `key` added for `addr`. Returns whether one existed.
    pub fn deregister(&mut self, addr: NativePtr, key: InstanceKey) -> bool {
        let Some(list) = self.entries.get_mut(&addr) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| entry.key != key);
        let removed = list.len() != before;
        if list.is_empty() {
            self.entries.remove(&addr);
        }
        removed
    }

    /// Live wrappers of `addr`, in registration order.
    pub fn find(&self, addr: NativePtr) -> Vec<HostObject> {
        self.entries
            .get(&addr)
            .map(|list| list.iter().filter_map(|e| e.wrapper.upgrade()).collect())
            .unwrap_or_default()
    }

    /// Whether any entry exists for `addr`.
    pub fn contains(&self, addr: NativePtr) -> bool {
        self.entries.contains_key(&addr)
    }

    /// Whether `key` registered `addr`.
    pub fn is_registered(&self, addr: NativePtr, key: InstanceKey) -> bool {
        self.entries
            .get(&addr)
            .is_some_and(|list| list.iter().any(|e| e.key == key))
    }

    /// Number of indexed addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for InstanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceIndex")
            .field("addresses", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_of(value: &u64) -> NativePtr {
        NativePtr::from_ref(value)
    }

    #[test]
    fn find_returns_live_wrappers() {
        let mut index = InstanceIndex::new();
        let value = 5u64;
        let wrapper = HostObject::int(5);

        index.register(addr_of(&value), wrapper.downgrade(), InstanceKey(1));
        let found = index.find(addr_of(&value));
        assert_eq!(found.len(), 1);
        assert!(found[0].is(&wrapper));
    }

    #[test]
    fn dead_wrappers_are_skipped() {
        let mut index = InstanceIndex::new();
        let value = 5u64;
        let wrapper = HostObject::int(5);
        index.register(addr_of(&value), wrapper.downgrade(), InstanceKey(1));
        drop(wrapper);

        assert!(index.find(addr_of(&value)).is_empty());
        assert!(index.contains(addr_of(&value)));
    }

    #[test]
    fn deregister_removes_only_own_entry() {
        let mut index = InstanceIndex::new();
        let value = 5u64;
        let a = HostObject::int(1);
        let b = HostObject::int(2);
        index.register(addr_of(&value), a.downgrade(), InstanceKey(1));
        index.register(addr_of(&value), b.downgrade(), InstanceKey(2));

        assert!(index.deregister(addr_of(&value), InstanceKey(1)));
        assert!(!index.deregister(addr_of(&value), InstanceKey(1)));
        assert!(index.is_registered(addr_of(&value), InstanceKey(2)));

        let found = index.find(addr_of(&value));
        assert_eq!(found.len(), 1);
        assert!(found[0].is(&b));

        assert!(index.deregister(addr_of(&value), InstanceKey(2)));
        assert!(index.is_empty());
    }
}
