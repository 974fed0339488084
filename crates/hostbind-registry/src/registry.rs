//! TypeRegistry - native identity to descriptor tables.
//!
//! This module provides [`TypeRegistry`], the storage behind native type
//! lookup. Every native identity maps to at most one descriptor per visibility
//! scope: the global table, or the local table of one module.
//!
//! # Lookup Order
//!
//! A lookup made from inside a module checks that module's local table first
//! and then the global table. A lookup made from the global scope (or from any
//! other module) never sees another module's local registrations, so a global
//! registration always wins over a foreign module-local one.
//!
//! # Thread Safety
//!
//! `TypeRegistry` is **not thread-safe** by itself. Registration happens while
//! modules initialize and lookups dominate afterwards, so the owner wraps it
//! in a reader-writer lock and registration completes before concurrent use.
//!
//! # Example
//!
//! ```
//! use hostbind_core::TypeHash;
//! use hostbind_registry::{Scope, TypeRegistry};
//!
//! let mut registry: TypeRegistry<&'static str> = TypeRegistry::new();
//! let module = registry.new_module();
//! let dog = TypeHash::from_name("Dog");
//!
//! registry.register(Scope::Global, dog, "Dog", "global dog").unwrap();
//! registry.register(Scope::Module(module), dog, "Dog", "local dog").unwrap();
//!
//! assert_eq!(**registry.lookup(dog, Scope::Module(module)).unwrap(), "local dog");
//! assert_eq!(**registry.lookup(dog, Scope::Global).unwrap(), "global dog");
//! ```

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use hostbind_core::{BindError, BindResult, HostTypeId, TypeHash, clean_type_name};

/// Identity of a registering module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Visibility scope of a registration or lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Visible to every module sharing the runtime.
    Global,
    /// Visible only inside the given module.
    Module(ModuleId),
}

/// Native identity to descriptor tables, one global and one per module.
pub struct TypeRegistry<D> {
    /// Globally visible descriptors.
    global: FxHashMap<TypeHash, Arc<D>>,

    /// Module-local descriptors, per module.
    locals: FxHashMap<ModuleId, FxHashMap<TypeHash, Arc<D>>>,

    /// Host type -> descriptor for every registered type, in any scope.
    by_host_type: FxHashMap<HostTypeId, Arc<D>>,

    next_module: u32,
}

impl<D> Default for TypeRegistry<D> {
    fn default() -> Self {
        Self {
            global: FxHashMap::default(),
            locals: FxHashMap::default(),
            by_host_type: FxHashMap::default(),
            next_module: 1,
        }
    }
}

impl<D> TypeRegistry<D> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh module scope.
    pub fn new_module(&mut self) -> ModuleId {
        let id = ModuleId(self.next_module);
        self.next_module += 1;
        self.locals.insert(id, FxHashMap::default());
        id
    }

    // ==========================================================================
    // Registration
    // ==========================================================================

    /// Register a descriptor for `id` in `scope`.
    ///
    /// Fails with `AlreadyRegistered` if the identity is already present in
    /// that scope. The same identity may be registered once globally and once
    /// per module.
    pub fn register(
        &mut self,
        scope: Scope,
        id: TypeHash,
        type_name: &str,
        descriptor: impl Into<Arc<D>>,
    ) -> BindResult<Arc<D>> {
        let table = match scope {
            Scope::Global => &mut self.global,
            Scope::Module(module) => self.locals.entry(module).or_default(),
        };

        if table.contains_key(&id) {
            return Err(BindError::AlreadyRegistered {
                type_name: clean_type_name(type_name),
            });
        }

        let descriptor = descriptor.into();
        table.insert(id, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Record which descriptor a host type was created for.
    pub fn register_host_type(&mut self, host_type: HostTypeId, descriptor: Arc<D>) {
        self.by_host_type.insert(host_type, descriptor);
    }

    // ==========================================================================
    // Lookup
    // ==========================================================================

    /// Resolve `id` as seen from `scope`: module-local first, then global.
    pub fn lookup(&self, id: TypeHash, scope: Scope) -> Option<&Arc<D>> {
        match scope {
            Scope::Global => self.global.get(&id),
            Scope::Module(module) => self
                .lookup_local(module, id)
                .or_else(|| self.global.get(&id)),
        }
    }

    /// The globally visible descriptor for `id`, ignoring every local table.
    pub fn lookup_global(&self, id: TypeHash) -> Option<&Arc<D>> {
        self.global.get(&id)
    }

    /// The descriptor registered for `id` in `module`'s local table only.
    pub fn lookup_local(&self, module: ModuleId, id: TypeHash) -> Option<&Arc<D>> {
        self.locals.get(&module).and_then(|table| table.get(&id))
    }

    /// The descriptor a registered host type was created for.
    pub fn by_host_type(&self, host_type: HostTypeId) -> Option<&Arc<D>> {
        self.by_host_type.get(&host_type)
    }

    /// Check if `id` is visible from `scope`.
    pub fn contains(&self, id: TypeHash, scope: Scope) -> bool {
        self.lookup(id, scope).is_some()
    }

    /// Number of registrations across all scopes.
    pub fn len(&self) -> usize {
        self.global.len() + self.locals.values().map(FxHashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over global descriptors.
    pub fn global_descriptors(&self) -> impl Iterator<Item = &Arc<D>> {
        self.global.values()
    }

    /// Every registered descriptor, global ones first.
    pub fn all_descriptors(&self) -> Vec<Arc<D>> {
        self.global
            .values()
            .chain(self.locals.values().flat_map(|table| table.values()))
            .cloned()
            .collect()
    }

    /// Drop every registration. Module ids are not reused.
    pub fn clear(&mut self) {
        self.global.clear();
        self.locals.clear();
        self.by_host_type.clear();
    }
}

impl<D> fmt::Debug for TypeRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("global", &self.global.len())
            .field("modules", &self.locals.len())
            .field("host_types", &self.by_host_type.len())
            .finish()
    }
}
