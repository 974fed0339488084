//! Process-wide binding state.
//!
//! [`Internals`] owns the type registry, the registered-instance index, the
//! resolution cache and the shared-data table. It is created lazily on first
//! use and torn down once by [`Internals::shutdown`]; every access after that
//! fails with `Finalized`.
//!
//! # Locking
//!
//! Each table has its own lock. No lock is held while host code runs, and
//! host objects found through the instance index are only dropped after the
//! index lock is released, since dropping a wrapper deregisters it.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hostbind_core::{BindError, BindResult, HostObject, HostType, TypeHash};
use hostbind_registry::{InstanceIndex, ResolutionCache, Scope, SharedData, TypeRegistry};

use crate::descriptor::TypeDescriptor;

/// The binding layer's global tables.
pub struct Internals {
    registry: RwLock<TypeRegistry<TypeDescriptor>>,
    instances: Mutex<InstanceIndex>,
    cache: RwLock<ResolutionCache<TypeDescriptor>>,
    shared: RwLock<SharedData>,
    finalized: AtomicBool,
}

lazy_static! {
    static ref INTERNALS: Internals = Internals::new();
}

/// Access the process-wide state.
pub fn get_internals() -> BindResult<&'static Internals> {
    let internals: &'static Internals = &INTERNALS;
    if internals.is_finalized() {
        return Err(BindError::Finalized);
    }
    Ok(internals)
}

impl Internals {
    fn new() -> Self {
        Internals {
            registry: RwLock::new(TypeRegistry::new()),
            instances: Mutex::new(InstanceIndex::new()),
            cache: RwLock::new(ResolutionCache::new()),
            shared: RwLock::new(SharedData::new()),
            finalized: AtomicBool::new(false),
        }
    }

    // ==========================================================================
    // Table access
    // ==========================================================================

    pub fn registry(&self) -> RwLockReadGuard<'_, TypeRegistry<TypeDescriptor>> {
        self.registry.read()
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, TypeRegistry<TypeDescriptor>> {
        self.registry.write()
    }

    pub fn instances(&self) -> MutexGuard<'_, InstanceIndex> {
        self.instances.lock()
    }

    pub fn cache(&self) -> RwLockReadGuard<'_, ResolutionCache<TypeDescriptor>> {
        self.cache.read()
    }

    pub fn cache_mut(&self) -> RwLockWriteGuard<'_, ResolutionCache<TypeDescriptor>> {
        self.cache.write()
    }

    // ==========================================================================
    // Lookup
    // ==========================================================================

    /// Resolve a native identity as seen from `scope`.
    pub fn lookup(&self, id: TypeHash, scope: Scope) -> Option<Arc<TypeDescriptor>> {
        self.registry.read().lookup(id, scope).cloned()
    }

    pub fn lookup_global(&self, id: TypeHash) -> Option<Arc<TypeDescriptor>> {
        self.registry.read().lookup_global(id).cloned()
    }

    /// The descriptor `host_type` was created for, if it is a registered type.
    pub fn descriptor_for(&self, host_type: &HostType) -> Option<Arc<TypeDescriptor>> {
        self.registry.read().by_host_type(host_type.id()).cloned()
    }

    // ==========================================================================
    // Shared data
    // ==========================================================================

    pub fn get_shared_data<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.shared.read().get::<T>(name)
    }

    pub fn set_shared_data<T: Any + Send + Sync>(&self, name: &str, value: T) {
        self.shared.write().set(name, value);
    }

    /// Fetch `name`, creating it with `init` if absent.
    pub fn shared_data_or_insert<T: Any + Send + Sync>(&self, name: &str, init: impl FnOnce() -> T) -> Option<Arc<T>> {
        self.shared.write().get_or_insert_with(name, init)
    }

    // ==========================================================================
    // Teardown
    // ==========================================================================

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Tear down every table. Returns `false` if already torn down.
    ///
    /// Descriptors lose their conversion closures and host types lose their
    /// attributes, which releases the reference cycles between them.
    pub fn shutdown(&self) -> bool {
        if self.finalized.swap(true, Ordering::AcqRel) {
            log::warn!("binding internals shut down twice");
            return false;
        }

        let descriptors = {
            let mut registry = self.registry.write();
            let all = registry.all_descriptors();
            registry.clear();
            all
        };
        self.cache.write().clear();
        self.instances.lock().clear();
        self.shared.write().clear();

        let mut released: Vec<HostObject> = Vec::new();
        for descriptor in &descriptors {
            descriptor.clear_conversions();
            released.extend(descriptor.host_type().clear_attrs());
        }
        log::debug!(
            "binding internals shut down: {} descriptors, {} type attributes released",
            descriptors.len(),
            released.len()
        );
        drop(released);
        true
    }
}

/// Read a shared-data entry from the process-wide table.
pub fn get_shared_data<T: Any + Send + Sync>(name: &str) -> BindResult<Option<Arc<T>>> {
    Ok(get_internals()?.get_shared_data(name))
}

/// Store a shared-data entry in the process-wide table.
pub fn set_shared_data<T: Any + Send + Sync>(name: &str, value: T) -> BindResult<()> {
    get_internals()?.set_shared_data(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_data_round_trip() {
        set_shared_data("internals::tests::answer", 42u32).unwrap();
        let value = get_shared_data::<u32>("internals::tests::answer").unwrap().unwrap();
        assert_eq!(*value, 42);
        assert!(get_shared_data::<String>("internals::tests::answer").unwrap().is_none());
    }

    #[test]
    fn shared_data_or_insert_keeps_first() {
        let internals = get_internals().unwrap();
        let first = internals
            .shared_data_or_insert("internals::tests::counter", || 1u64)
            .unwrap();
        let second = internals
            .shared_data_or_insert("internals::tests::counter", || 2u64)
            .unwrap();
        assert_eq!(*first, 1);
        assert_eq!(*second, 1);
    }

    #[test]
    fn unknown_identity_is_not_found() {
        let internals = get_internals().unwrap();
        assert!(
            internals
                .lookup(TypeHash::from_name("internals::tests::Nothing"), Scope::Global)
                .is_none()
        );
    }
}
