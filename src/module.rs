//! Binding modules.
//!
//! A [`Module`] is the unit native code registers into. It owns a registry
//! scope for module-local types, the free functions it defines and the host
//! types of the classes it registered.
//!
//! # Example
//!
//! ```ignore
//! let mut module = Module::new("shapes")?;
//! module
//!     .class::<Circle>("Circle")
//!     .init(1, |ctx| Ok(Circle { radius: ctx.arg(0)? }))
//!     .def("area", 0, |ctx| ctx.this::<Circle>()?.area().into_host())
//!     .build()?;
//! module.def("unit_circle", 0, |_| cast_value(Circle { radius: 1.0 }));
//! ```

use std::cell::Cell;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use hostbind_core::{BindError, BindResult, HostObject, HostType, NativeType, TypeHash};
use hostbind_registry::{ModuleId, Scope};

use crate::call_context::{CallContext, NativeFunction};
use crate::caster::descriptor_of;
use crate::class_builder::ClassBuilder;
use crate::descriptor::TypeDescriptor;
use crate::internals::get_internals;

/// A named registration scope.
pub struct Module {
    id: ModuleId,
    name: String,
    functions: FxHashMap<String, NativeFunction>,
    types: FxHashMap<String, HostType>,
}

impl Module {
    /// Create a module with a fresh local scope.
    pub fn new(name: impl Into<String>) -> BindResult<Self> {
        let id = get_internals()?.registry_mut().new_module();
        let name = name.into();
        log::debug!("created module '{}' ({:?})", name, id);
        Ok(Module {
            id,
            name,
            functions: FxHashMap::default(),
            types: FxHashMap::default(),
        })
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope seen by code registered in this module.
    pub fn scope(&self) -> Scope {
        Scope::Module(self.id)
    }

    /// Resolve a native identity: this module's local types first, then the
    /// global ones.
    pub fn lookup(&self, id: TypeHash) -> BindResult<Option<Arc<TypeDescriptor>>> {
        Ok(get_internals()?.lookup(id, self.scope()))
    }

    pub fn descriptor_of<T: NativeType>(&self) -> BindResult<Arc<TypeDescriptor>> {
        descriptor_of::<T>(self.scope())
    }

    /// Start registering `T` under the host name `name`.
    pub fn class<T: NativeType>(&mut self, name: impl Into<String>) -> ClassBuilder<'_, T> {
        ClassBuilder::new(self, name.into())
    }

    /// Define (or add an overload to) a free function.
    pub fn def<F>(&mut self, name: &str, arity: usize, f: F) -> &mut Self
    where
        F: Fn(&CallContext<'_>) -> BindResult<HostObject> + Send + Sync + 'static,
    {
        let scope = self.scope();
        self.functions
            .entry(name.to_string())
            .or_insert_with(|| NativeFunction::new(name, scope))
            .push(arity, Vec::new(), Arc::new(f));
        self
    }

    /// A defined function as a host object.
    pub fn function(&self, name: &str) -> Option<HostObject> {
        self.functions.get(name).map(|f| f.clone().into_host())
    }

    /// Call a defined function.
    pub fn call(&self, name: &str, args: &[HostObject]) -> BindResult<HostObject> {
        let function = self.functions.get(name).ok_or_else(|| BindError::AttributeError {
            object: format!("module '{}'", self.name),
            name: name.to_string(),
        })?;
        function.call(args)
    }

    /// Host type of a class registered through this module.
    pub fn host_type(&self, name: &str) -> Option<&HostType> {
        self.types.get(name)
    }

    pub(crate) fn add_type(&mut self, name: String, host_type: HostType) {
        self.types.insert(name, host_type);
    }

    // ==========================================================================
    // Implicit conversions
    // ==========================================================================

    /// Let host values of `S` convert to `D` by calling `D`'s constructor
    /// with them. `D` needs a one-argument `init` accepting an `S`.
    pub fn implicitly_convertible<S: NativeType, D: NativeType>(&self) -> BindResult<()> {
        let source = self.descriptor_of::<S>()?;
        self.implicitly_convertible_from::<D>(source.host_type().clone())
    }

    /// Let host values of `source` (and its subtypes) convert to `D`.
    pub fn implicitly_convertible_from<D: NativeType>(&self, source: HostType) -> BindResult<()> {
        let target = self.descriptor_of::<D>()?;
        let target_type = target.host_type().clone();
        log::debug!("{} implicitly converts to {}", source.name(), target.name());

        target.add_implicit_conversion(Arc::new(move |src: &HostObject| {
            if !src.type_().is_subtype_of(&source) {
                return Ok(None);
            }
            let Some(_guard) = ConversionGuard::enter() else {
                return Ok(None);
            };
            match target_type.call(std::slice::from_ref(src)) {
                Ok(converted) => Ok(Some(converted)),
                Err(err) if err.is_internal() => Err(err),
                Err(err) => {
                    log::trace!("implicit conversion to {} failed: {err}", target_type.name());
                    Ok(None)
                }
            }
        }));
        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("functions", &self.functions.len())
            .field("types", &self.types.len())
            .finish()
    }
}

thread_local! {
    static CONVERTING: Cell<bool> = const { Cell::new(false) };
}

/// Blocks nested implicit conversions on this thread, so a constructor that
/// loads its own argument with conversion cannot recurse.
struct ConversionGuard;

impl ConversionGuard {
    fn enter() -> Option<Self> {
        CONVERTING.with(|converting| (!converting.replace(true)).then_some(ConversionGuard))
    }
}

impl Drop for ConversionGuard {
    fn drop(&mut self) {
        CONVERTING.with(|converting| converting.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::IntoHost;

    #[test]
    fn modules_get_distinct_scopes() {
        let a = Module::new("a").unwrap();
        let b = Module::new("b").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.scope(), Scope::Module(a.id()));
        assert_eq!(b.name(), "b");
    }

    #[test]
    fn def_merges_overloads() {
        let mut module = Module::new("math").unwrap();
        module
            .def("twice", 1, |ctx| (ctx.arg::<i64>(0)? * 2).into_host())
            .def("twice", 1, |ctx| format!("{0}{0}", ctx.arg::<String>(0)?).into_host());

        assert_eq!(module.call("twice", &[HostObject::int(4)]).unwrap().as_int(), Some(8));
        assert_eq!(module.call("twice", &[HostObject::str("ab")]).unwrap().as_str(), Some("abab"));

        let f = module.function("twice").unwrap();
        assert_eq!(f.call(&[HostObject::int(1)]).unwrap().as_int(), Some(2));
    }

    #[test]
    fn missing_function_is_an_attribute_error() {
        let module = Module::new("empty").unwrap();
        assert!(matches!(
            module.call("nothing", &[]),
            Err(BindError::AttributeError { .. })
        ));
        assert!(module.function("nothing").is_none());
    }

    #[test]
    fn conversion_guard_blocks_nesting() {
        let outer = ConversionGuard::enter();
        assert!(outer.is_some());
        assert!(ConversionGuard::enter().is_none());
        drop(outer);
        assert!(ConversionGuard::enter().is_some());
    }
}
