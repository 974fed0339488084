//! ClassBuilder for registering native types.
//!
//! A builder collects everything the binding layer needs to know about a
//! native type: its native bases, holder kind, copy and move support,
//! locality, runtime-type hook and anchor, plus its constructors and
//! methods. [`ClassBuilder::build`] creates the host type, the descriptor and
//! the registry entries in one step.
//!
//! # Example
//!
//! ```ignore
//! module
//!     .class::<Dog>("Dog")
//!     .base::<Animal>(|p| p)
//!     .holder(HolderKind::Shared)
//!     .copyable()
//!     .init(1, |ctx| Ok(Dog::new(ctx.arg::<String>(0)?)))
//!     .def("bark", 0, |ctx| ctx.this::<Dog>()?.bark().into_host())
//!     .build()?;
//! ```
//!
//! # Base upcasts
//!
//! The upcast given to [`ClassBuilder::base`] must be pure address
//! arithmetic (identity, or `byte_offset` by the field offset of the base).
//! It is called once on a dummy address to learn the base offset.

use std::marker::PhantomData;
use std::sync::Arc;

use hostbind_core::{
    BindError, BindResult, HostObject, HostType, NativePtr, NativeType, NativeVTable, RuntimeTypeFn, TypeFlags,
    TypeHash, UpcastFn, clean_type_name,
};
use hostbind_registry::Scope;

use crate::call_context::{CallContext, NativeFunction};
use crate::caster::{LOCAL_LOADER_ATTR, LocalLoader, descriptor_of, init_instance};
use crate::descriptor::{AnchorFn, BaseLink, DescriptorParts, ReclaimFn, ReleaseFn, ReleaseInfo, TypeDescriptor};
use crate::holder::Holder;
use crate::holder_caster::{reclaim, release_shared, release_unique};
use crate::instance::{Instance, instance_allocator};
use crate::internals::get_internals;
use crate::module::Module;
use crate::policy::HolderKind;
use crate::trampoline::{Wrapper, anchor_of};

/// Dummy address handed to upcasts to measure base offsets.
const SAMPLE_ADDR: usize = 1 << 16;

struct PendingBase {
    id: TypeHash,
    native_name: &'static str,
    upcast: UpcastFn,
}

/// Builder for registering a native type.
///
/// Created by [`Module::class`].
pub struct ClassBuilder<'m, T: NativeType> {
    module: &'m mut Module,
    name: String,
    /// Registration scope; global unless `module_local` was called.
    scope: Scope,
    bases: Vec<PendingBase>,
    holder: HolderKind,
    vtable: NativeVTable,
    runtime_type: Option<RuntimeTypeFn>,
    anchor: Option<AnchorFn>,
    init: NativeFunction,
    methods: Vec<NativeFunction>,
    _marker: PhantomData<T>,
}

impl<'m, T: NativeType> ClassBuilder<'m, T> {
    pub(crate) fn new(module: &'m mut Module, name: String) -> Self {
        let init = NativeFunction::method(format!("{name}.__init__"), module.scope());
        ClassBuilder {
            module,
            name,
            scope: Scope::Global,
            bases: Vec::new(),
            holder: HolderKind::None,
            vtable: NativeVTable::of::<T>(),
            runtime_type: None,
            anchor: None,
            init,
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declare a registered native base `B`, reached through `upcast`.
    pub fn base<B: NativeType>(mut self, upcast: UpcastFn) -> Self {
        self.bases.push(PendingBase {
            id: B::type_hash(),
            native_name: B::type_name(),
            upcast,
        });
        self
    }

    /// Hold instances through the given holder kind.
    pub fn holder(mut self, kind: HolderKind) -> Self {
        self.holder = kind;
        self
    }

    /// Register the type in the module's local scope only.
    pub fn module_local(mut self) -> Self {
        self.scope = self.module.scope();
        self
    }

    /// Install a hook reporting the most-derived type of a value reached
    /// through a `T` pointer.
    pub fn polymorphic(mut self, hook: RuntimeTypeFn) -> Self {
        self.runtime_type = Some(hook);
        self
    }

    /// Add a constructor taking `arity` arguments.
    pub fn init<F>(mut self, arity: usize, f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> BindResult<T> + Send + Sync + 'static,
    {
        let scope = self.module.scope();
        self.init.push(
            arity,
            Vec::new(),
            Arc::new(move |ctx: &CallContext<'_>| {
                let value = f(ctx)?;
                construct_in_place(ctx.this_obj()?, Box::new(value), scope)
            }),
        );
        self
    }

    /// Add a method (or another overload of it). The receiver is available
    /// through [`CallContext::this`].
    pub fn def<F>(mut self, name: &str, arity: usize, f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> BindResult<HostObject> + Send + Sync + 'static,
    {
        let call = Arc::new(f);
        match self.methods.iter_mut().find(|m| m.name() == name) {
            Some(method) => method.push(arity, Vec::new(), call),
            None => {
                let mut method = NativeFunction::method(name, self.module.scope());
                method.push(arity, Vec::new(), call);
                self.methods.push(method);
            }
        }
        self
    }

    /// Create the host type and register the descriptor.
    pub fn build(self) -> BindResult<Arc<TypeDescriptor>> {
        let internals = get_internals()?;

        let mut bases = Vec::with_capacity(self.bases.len());
        for pending in &self.bases {
            let descriptor = internals
                .lookup(pending.id, self.module.scope())
                .ok_or_else(|| BindError::Unregistered {
                    type_name: clean_type_name(pending.native_name),
                })?;
            bases.push(BaseLink {
                descriptor,
                upcast: pending.upcast,
                offset: measure_offset(pending.upcast),
            });
        }

        let host_type = HostType::builder(self.name.clone())
            .bases(bases.iter().map(|base| base.descriptor.host_type().clone()))
            .flags(TypeFlags::NATIVE)
            .alloc(instance_allocator())
            .build()?;

        let module = match self.scope {
            Scope::Global => None,
            Scope::Module(id) => Some(id),
        };
        let descriptor = Arc::new(TypeDescriptor::new(DescriptorParts {
            id: T::type_hash(),
            native_name: T::type_name(),
            name: self.name.clone(),
            host_type: host_type.clone(),
            vtable: self.vtable,
            bases,
            release: release_info(self.holder, self.anchor.is_some()),
            module,
            runtime_type: self.runtime_type,
            anchor: self.anchor,
        }));

        {
            let mut registry = internals.registry_mut();
            registry.register(self.scope, T::type_hash(), T::type_name(), Arc::clone(&descriptor))?;
            registry.register_host_type(host_type.id(), Arc::clone(&descriptor));
        }

        for base in descriptor.bases() {
            base.descriptor.add_implicit_cast(&descriptor, base.upcast);
        }
        if descriptor.bases().len() > 1 || descriptor.bases().iter().any(|base| base.offset != 0) {
            descriptor.mark_non_simple();
        }

        if let Some(module) = module {
            host_type.set_attr(
                LOCAL_LOADER_ATTR,
                HostObject::capsule(LocalLoader::new(module, &descriptor)),
            );
        }
        if self.init.overload_count() > 0 {
            host_type.set_attr("__init__", self.init.into_host());
        }
        for method in self.methods {
            let name = method.name().to_string();
            host_type.set_attr(name, method.into_host());
        }

        log::debug!(
            "registered {} as '{}' ({:?} holder, {} bases, {:?})",
            T::clean_name(),
            descriptor.name(),
            descriptor.holder_kind(),
            descriptor.bases().len(),
            self.scope
        );
        self.module.add_type(self.name, host_type);
        Ok(descriptor)
    }
}

impl<T: NativeType + Clone> ClassBuilder<'_, T> {
    /// Allow copies (`ReturnPolicy::Copy`, by-reference returns).
    pub fn copyable(mut self) -> Self {
        self.vtable = self.vtable.copyable::<T>();
        self
    }
}

impl<T: NativeType + Default> ClassBuilder<'_, T> {
    /// Allow moves; the source is left defaulted.
    pub fn movable(mut self) -> Self {
        self.vtable = self.vtable.movable::<T>();
        self
    }
}

impl<T: Wrapper> ClassBuilder<'_, T> {
    /// Let host classes extend `T` and keep their state alive while native
    /// code owns the value.
    pub fn wrapper(mut self) -> Self {
        self.anchor = Some(anchor_of::<T> as AnchorFn);
        self
    }
}

fn release_info(holder: HolderKind, anchored: bool) -> ReleaseInfo {
    match holder {
        HolderKind::None => ReleaseInfo::plain(),
        HolderKind::Unique => ReleaseInfo {
            holder,
            can_derive_from_wrapper: anchored,
            release_to_native: Some(release_unique as ReleaseFn),
            reclaim: Some(reclaim as ReclaimFn),
        },
        HolderKind::Shared => ReleaseInfo {
            holder,
            can_derive_from_wrapper: anchored,
            release_to_native: anchored.then_some(release_shared as ReleaseFn),
            reclaim: Some(reclaim as ReclaimFn),
        },
    }
}

fn measure_offset(upcast: UpcastFn) -> isize {
    let Some(sample) = NativePtr::from_raw(std::ptr::without_provenance_mut::<u8>(SAMPLE_ADDR)) else {
        return 0;
    };
    upcast(sample).addr() as isize - SAMPLE_ADDR as isize
}

/// Move a freshly constructed value into the receiver's slot for `T`.
fn construct_in_place<T: NativeType>(this: &HostObject, value: Box<T>, scope: Scope) -> BindResult<HostObject> {
    let descriptor = descriptor_of::<T>(scope)?;
    let instance = Instance::of(this).ok_or_else(|| BindError::NotInitialized {
        type_name: descriptor.name().to_string(),
    })?;
    let v_h = instance
        .value_and_holder_for(&descriptor)
        .ok_or_else(|| BindError::mismatch(descriptor.name(), this.type_name()))?;
    if v_h.value().is_some() {
        return Err(BindError::Raised(format!(
            "{}.__init__ called on an initialized instance",
            descriptor.name()
        )));
    }

    v_h.set_value(Some(NativePtr::from_box(value)));
    instance.set_owned(true);
    init_instance(this, &descriptor, Holder::Empty)?;
    Ok(HostObject::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::IntoHost;
    use std::mem::offset_of;

    #[repr(C)]
    #[derive(Default)]
    struct Pair {
        left: u64,
        right: u32,
    }

    impl NativeType for Pair {}

    #[test]
    fn upcast_measures_field_offset() {
        assert_eq!(measure_offset(|p| p), 0);
        let offset = offset_of!(Pair, right) as isize;
        assert_eq!(measure_offset(|p| p.byte_offset(offset_of!(Pair, right) as isize)), offset);
    }

    #[test]
    fn release_info_per_holder() {
        assert!(release_info(HolderKind::None, false).release_to_native.is_none());
        assert!(release_info(HolderKind::Unique, false).release_to_native.is_some());
        assert!(release_info(HolderKind::Shared, false).release_to_native.is_none());

        let anchored = release_info(HolderKind::Shared, true);
        assert!(anchored.release_to_native.is_some());
        assert!(anchored.can_derive_from_wrapper);
        assert!(anchored.reclaim.is_some());
    }

    #[test]
    fn build_registers_and_constructs() {
        struct Counter {
            count: i64,
        }
        impl NativeType for Counter {}

        let mut module = Module::new("class_builder::tests").unwrap();
        let descriptor = module
            .class::<Counter>("Counter")
            .init(1, |ctx| Ok(Counter { count: ctx.arg(0)? }))
            .def("get", 0, |ctx| ctx.this::<Counter>()?.count.into_host())
            .def("bump", 1, |ctx| {
                let by = ctx.arg::<i64>(0)?;
                // SAFETY: the only borrow of the receiver in this method.
                let counter = unsafe { ctx.this_mut::<Counter>()? };
                counter.count += by;
                Ok(HostObject::none())
            })
            .build()
            .unwrap();

        assert!(descriptor.is_simple_type());
        assert!(!descriptor.is_module_local());
        let host_type = module.host_type("Counter").unwrap().clone();
        assert!(host_type.is_native());

        let counter = host_type.call(&[HostObject::int(2)]).unwrap();
        counter.call_method("bump", &[HostObject::int(3)]).unwrap();
        assert_eq!(counter.call_method("get", &[]).unwrap().as_int(), Some(5));
        assert!(Instance::of(&counter).unwrap().owned());

        let again = counter.call_method("__init__", &[HostObject::int(1)]);
        assert!(matches!(again, Err(BindError::Raised(_))));
    }

    #[test]
    fn duplicate_registration_fails() {
        struct Once;
        impl NativeType for Once {}

        let mut module = Module::new("class_builder::dup").unwrap();
        module.class::<Once>("Once").build().unwrap();
        let err = module.class::<Once>("Once").build().unwrap_err();
        assert!(matches!(err, BindError::AlreadyRegistered { .. }));
    }

    #[test]
    fn unknown_base_is_unregistered() {
        struct Orphan;
        impl NativeType for Orphan {}
        struct Missing;
        impl NativeType for Missing {}

        let mut module = Module::new("class_builder::orphan").unwrap();
        let err = module.class::<Orphan>("Orphan").base::<Missing>(|p| p).build().unwrap_err();
        assert!(matches!(err, BindError::Unregistered { type_name } if type_name.contains("Missing")));
    }
}
