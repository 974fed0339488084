//! Value casting between host objects and registered native types.
//!
//! Loading (host → native) goes through the [`Loader`] trait. The generic
//! algorithm lives in [`load_impl`]; the plain [`TypeCaster`] and the holder
//! casters plug in their own `load_value`, holder compatibility check and
//! implicit-cast step.
//!
//! Casting (native → host) is [`cast`]: it returns the existing wrapper of
//! an address when one is registered (reclaiming ownership into it if the
//! caller hands over a holder), and otherwise builds a fresh wrapper whose
//! ownership follows the [`ReturnPolicy`].
//!
//! # Load order
//!
//! 1. `None` loads as a null value, in convert mode only.
//! 2. Registered instances are classified with [`determine_load_type`] and
//!    read straight from their slot.
//! 3. Host subclasses with several native roots try the implicit casts.
//! 4. In convert mode, implicit conversions build a temporary which is
//!    reloaded without conversion and kept alive for the call, then direct
//!    conversions run.
//! 5. A module-local type retries with the global registration.
//! 6. A module-local type of another module is loaded through that module's
//!    local loader.

use std::sync::{Arc, Weak};

use hostbind_core::{BindError, BindResult, HostObject, NativePtr, NativeType, TypeHash, clean_type_name};
use hostbind_registry::{ModuleId, Scope};

use crate::descriptor::TypeDescriptor;
use crate::holder::Holder;
use crate::instance::{Instance, ValueAndHolder};
use crate::internals::get_internals;
use crate::life_support::{add_patient, current_scope, keep_alive};
use crate::policy::{HolderKind, ReturnPolicy};
use crate::resolve::{LoadType, all_type_info, determine_load_type};

/// Name of the type attribute carrying a module-local loader capsule.
pub const LOCAL_LOADER_ATTR: &str = "__hostbind_local_loader__";

/// Capsule payload letting other modules load a module-local type.
pub struct LocalLoader {
    pub(crate) module: ModuleId,
    pub(crate) descriptor: Weak<TypeDescriptor>,
}

impl LocalLoader {
    pub(crate) fn new(module: ModuleId, descriptor: &Arc<TypeDescriptor>) -> Self {
        LocalLoader {
            module,
            descriptor: Arc::downgrade(descriptor),
        }
    }
}

// ============================================================================
// Loader
// ============================================================================

/// A host → native conversion strategy for registered types.
pub trait Loader: Sized {
    fn caster(&self) -> &TypeCaster;
    fn caster_mut(&mut self) -> &mut TypeCaster;

    /// Fail early when the value's type cannot be held the way this loader
    /// needs.
    fn check_holder_compat(&self, _descriptor: &TypeDescriptor) -> BindResult<()> {
        Ok(())
    }

    /// Read the value (and holder) out of a matched slot.
    fn load_value(&mut self, src: &HostObject, v_h: ValueAndHolder<'_>, load_type: LoadType) -> BindResult<()>;

    /// Try loading through each registered implicit-cast source.
    fn try_implicit_casts(&mut self, src: &HostObject, convert: bool) -> BindResult<bool>;

    fn try_direct_conversions(&mut self, _src: &HostObject) -> BindResult<bool> {
        Ok(false)
    }

    /// Load `src`. Returns `Ok(false)` when `src` is not convertible.
    fn load(&mut self, src: &HostObject, convert: bool) -> BindResult<bool> {
        load_impl(self, src, convert)
    }
}

/// The shared load algorithm.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn load_impl<L: Loader>(this: &mut L, src: &HostObject, convert: bool) -> BindResult<bool> {
    let Some(descriptor) = this.caster().descriptor.clone() else {
        return this.caster_mut().try_load_foreign_module_local(src);
    };

    if src.is_none() {
        if !convert {
            return Ok(false);
        }
        this.caster_mut().value = None;
        return Ok(true);
    }

    this.check_holder_compat(&descriptor)?;

    let load_type = determine_load_type(src, &descriptor)?;
    if let Some(slot) = load_type.slot() {
        let instance = Instance::of(src).ok_or_else(|| BindError::NotInitialized {
            type_name: descriptor.name().to_string(),
        })?;
        let v_h = instance
            .value_and_holder(slot)
            .ok_or_else(|| BindError::NotInitialized {
                type_name: descriptor.name().to_string(),
            })?;
        this.load_value(src, v_h, load_type)?;
        return Ok(true);
    }
    if load_type == LoadType::DerivedMultiRootNoMatch && this.try_implicit_casts(src, convert)? {
        return Ok(true);
    }

    if convert {
        for conversion in descriptor.implicit_conversions() {
            if let Some(temp) = conversion(src)?
                && this.load(&temp, false)?
            {
                add_patient(temp)?;
                return Ok(true);
            }
        }
        if this.try_direct_conversions(src)? {
            return Ok(true);
        }
    }

    if descriptor.is_module_local()
        && let Some(global) = get_internals()?.lookup_global(descriptor.id())
    {
        this.caster_mut().descriptor = Some(global);
        return this.load(src, false);
    }

    this.caster_mut().try_load_foreign_module_local(src)
}

// ============================================================================
// TypeCaster
// ============================================================================

/// Generic caster: loads a bare pointer to a registered type.
#[derive(Debug, Clone)]
pub struct TypeCaster {
    native_id: TypeHash,
    native_name: &'static str,
    scope: Scope,
    pub(crate) descriptor: Option<Arc<TypeDescriptor>>,
    pub(crate) value: Option<NativePtr>,
}

impl TypeCaster {
    /// Caster for a known descriptor.
    pub fn new(descriptor: Arc<TypeDescriptor>, scope: Scope) -> Self {
        TypeCaster {
            native_id: descriptor.id(),
            native_name: descriptor.native_name(),
            scope,
            descriptor: Some(descriptor),
            value: None,
        }
    }

    /// Caster for a native identity as seen from `scope`. The descriptor may
    /// be missing if the type is only registered locally by another module.
    pub fn lookup(id: TypeHash, native_name: &'static str, scope: Scope) -> BindResult<Self> {
        let descriptor = get_internals()?.lookup(id, scope);
        Ok(TypeCaster {
            native_id: id,
            native_name,
            scope,
            descriptor,
            value: None,
        })
    }

    pub fn of<T: NativeType>(scope: Scope) -> BindResult<Self> {
        Self::lookup(T::type_hash(), T::type_name(), scope)
    }

    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        self.descriptor.as_ref()
    }

    /// The loaded value; `None` after loading none in convert mode.
    pub fn value(&self) -> Option<NativePtr> {
        self.value
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn native_id(&self) -> TypeHash {
        self.native_id
    }

    /// Name for error messages.
    pub fn type_name(&self) -> String {
        match &self.descriptor {
            Some(descriptor) => descriptor.name().to_string(),
            None => clean_type_name(self.native_name),
        }
    }

    /// Load through the local loader another module attached to the type of
    /// `src`.
    pub(crate) fn try_load_foreign_module_local(&mut self, src: &HostObject) -> BindResult<bool> {
        let Some(capsule) = src.type_().lookup(LOCAL_LOADER_ATTR) else {
            return Ok(false);
        };
        let Some(loader) = capsule.capsule_ref::<LocalLoader>() else {
            return Ok(false);
        };
        // Our own loader: the regular lookup already had its chance.
        if Scope::Module(loader.module) == self.scope {
            return Ok(false);
        }
        let Some(foreign) = loader.descriptor.upgrade() else {
            return Ok(false);
        };
        if foreign.id() != self.native_id {
            return Ok(false);
        }

        let mut foreign_caster = TypeCaster::new(foreign, Scope::Module(loader.module));
        if foreign_caster.load(src, false)? {
            self.value = foreign_caster.value;
            return Ok(true);
        }
        Ok(false)
    }
}

impl Loader for TypeCaster {
    fn caster(&self) -> &TypeCaster {
        self
    }

    fn caster_mut(&mut self) -> &mut TypeCaster {
        self
    }

    fn load_value(&mut self, _src: &HostObject, v_h: ValueAndHolder<'_>, _load_type: LoadType) -> BindResult<()> {
        let value = v_h.value().ok_or_else(|| BindError::NotInitialized {
            type_name: v_h.descriptor().name().to_string(),
        })?;
        self.value = Some(value);
        Ok(())
    }

    fn try_implicit_casts(&mut self, src: &HostObject, convert: bool) -> BindResult<bool> {
        let Some(descriptor) = self.descriptor.clone() else {
            return Ok(false);
        };
        for (source, upcast) in descriptor.implicit_casts() {
            let mut sub = TypeCaster::new(source, self.scope);
            if sub.load(src, convert)? {
                self.value = sub.value.map(upcast);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn try_direct_conversions(&mut self, src: &HostObject) -> BindResult<bool> {
        let Some(descriptor) = self.descriptor.clone() else {
            return Ok(false);
        };
        for conversion in descriptor.direct_conversions() {
            if let Some(value) = conversion(src) {
                self.value = Some(value);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ============================================================================
// Cast
// ============================================================================

/// Resolve the most-derived registered type of `src` through the
/// descriptor's runtime-type hook.
fn src_and_type(
    src: NativePtr,
    descriptor: &Arc<TypeDescriptor>,
    scope: Scope,
) -> BindResult<(NativePtr, Arc<TypeDescriptor>)> {
    if let Some(hook) = descriptor.runtime_type()
        // SAFETY: `src` addresses a live value of the descriptor's type.
        && let Some((dynamic, most_derived)) = unsafe { hook(src) }
        && dynamic != descriptor.id()
        && let Some(found) = get_internals()?.lookup(dynamic, scope)
    {
        log::trace!("{} resolved to dynamic type {}", descriptor.name(), found.name());
        return Ok((most_derived, found));
    }
    Ok((src, Arc::clone(descriptor)))
}

/// Wrap the native value at `src` for the host.
///
/// A `holder`, when given, owns `src`; it is either installed in a fresh
/// wrapper or reclaimed by the existing one. Holders are only accepted with
/// ownership-taking policies.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn cast(
    src: Option<NativePtr>,
    descriptor: &Arc<TypeDescriptor>,
    policy: ReturnPolicy,
    parent: Option<&HostObject>,
    holder: Holder,
) -> BindResult<HostObject> {
    let Some(src) = src else {
        return Ok(HostObject::none());
    };
    let take_ownership = policy.takes_ownership();
    if !holder.is_empty() && !take_ownership {
        return Err(BindError::HolderMismatch {
            type_name: descriptor.name().to_string(),
            detail: format!("a holder cannot be cast with the {policy:?} policy"),
        });
    }

    let (src, descriptor) = src_and_type(src, descriptor, current_scope())?;

    if let Some(existing) = find_registered(src, &descriptor, take_ownership, holder.is_empty())? {
        return match existing {
            Existing::Wrapper(wrapper) => Ok(wrapper),
            Existing::Reclaim(wrapper, slot, reclaim_into) => {
                let reclaim = reclaim_into
                    .release_info()
                    .reclaim
                    .ok_or_else(|| BindError::InconsistentOwnership {
                        type_name: reclaim_into.name().to_string(),
                    })?;
                log::debug!("reclaiming ownership of {} at {:?}", reclaim_into.name(), src);
                reclaim(&reclaim_into, &wrapper, slot, holder)
            }
        };
    }

    let wrapper = descriptor.host_type().allocate()?;
    {
        let instance = wrapper_instance(&wrapper, &descriptor)?;
        let v_h = instance
            .value_and_holder(0)
            .ok_or_else(|| BindError::NotInitialized {
                type_name: descriptor.name().to_string(),
            })?;
        let vtable = descriptor.vtable();

        let (value, owned) = match policy {
            ReturnPolicy::Automatic | ReturnPolicy::TakeOwnership => (src, true),
            ReturnPolicy::AutomaticReference | ReturnPolicy::Reference | ReturnPolicy::ReferenceInternal => {
                (src, false)
            }
            ReturnPolicy::Copy => {
                let copy = vtable.copy.ok_or_else(|| BindError::NotCopyable {
                    type_name: descriptor.name().to_string(),
                })?;
                // SAFETY: `src` addresses a live value of the descriptor's type.
                (unsafe { copy(src) }, true)
            }
            ReturnPolicy::Move => {
                let ctor = vtable
                    .move_
                    .or(vtable.copy)
                    .ok_or_else(|| BindError::NotMovableOrCopyable {
                        type_name: descriptor.name().to_string(),
                    })?;
                // SAFETY: as above.
                (unsafe { ctor(src) }, true)
            }
        };
        v_h.set_value(Some(value));
        instance.set_owned(owned);
    }

    if policy == ReturnPolicy::ReferenceInternal
        && let Some(parent) = parent
    {
        keep_alive(&wrapper, parent);
    }

    if let Err(err) = init_instance(&wrapper, &descriptor, holder) {
        // Ownership stays with the caller when the wrapper cannot be set up.
        if let Some(instance) = Instance::of(&wrapper) {
            instance.set_owned(false);
        }
        return Err(err);
    }
    Ok(wrapper)
}

enum Existing {
    Wrapper(HostObject),
    Reclaim(HostObject, usize, Arc<TypeDescriptor>),
}

/// Look for a registered wrapper of `src` exposing `descriptor` or a type
/// derived from it.
fn find_registered(
    src: NativePtr,
    descriptor: &Arc<TypeDescriptor>,
    take_ownership: bool,
    bare_pointer: bool,
) -> BindResult<Option<Existing>> {
    let wrappers = get_internals()?.instances().find(src);
    for wrapper in wrappers {
        let roots = all_type_info(wrapper.type_())?;
        let Some(slot) = roots.iter().position(|root| root.derives_from(descriptor.id())) else {
            continue;
        };
        if bare_pointer {
            return Ok(Some(Existing::Wrapper(wrapper)));
        }

        let root = Arc::clone(&roots[slot]);
        let try_to_reclaim = match root.holder_kind() {
            HolderKind::Unique => take_ownership,
            HolderKind::Shared => {
                let instance = wrapper_instance(&wrapper, &root)?;
                let constructed = instance
                    .value_and_holder(slot)
                    .is_some_and(|v_h| v_h.holder_constructed());
                if take_ownership && !constructed {
                    if instance.owned() {
                        return Err(BindError::InconsistentOwnership {
                            type_name: root.name().to_string(),
                        });
                    }
                    true
                } else {
                    false
                }
            }
            HolderKind::None => false,
        };

        return Ok(Some(if try_to_reclaim {
            Existing::Reclaim(wrapper, slot, root)
        } else {
            Existing::Wrapper(wrapper)
        }));
    }
    Ok(None)
}

fn wrapper_instance<'a>(wrapper: &'a HostObject, descriptor: &TypeDescriptor) -> BindResult<&'a Instance> {
    Instance::of(wrapper).ok_or_else(|| BindError::NotInitialized {
        type_name: descriptor.name().to_string(),
    })
}

/// Register a freshly populated wrapper and construct its holder.
pub(crate) fn init_instance(wrapper: &HostObject, descriptor: &TypeDescriptor, holder: Holder) -> BindResult<()> {
    let instance = wrapper_instance(wrapper, descriptor)?;
    let v_h = instance
        .value_and_holder_for(descriptor)
        .ok_or_else(|| BindError::NotInitialized {
            type_name: descriptor.name().to_string(),
        })?;
    instance.register(wrapper)?;

    if !holder.is_empty() {
        if holder.kind() != descriptor.holder_kind() {
            return Err(BindError::HolderMismatch {
                type_name: descriptor.name().to_string(),
                detail: format!("registered with {:?}, given {:?}", descriptor.holder_kind(), holder.kind()),
            });
        }
        return v_h.set_holder(holder);
    }

    if instance.owned()
        && descriptor.holder_kind() != HolderKind::None
        && let Some(value) = v_h.value()
    {
        // SAFETY: an owned value was boxed for this type and is only freed
        // through the holder from here on.
        let holder = unsafe { Holder::for_value(descriptor.holder_kind(), value, descriptor.vtable().drop) };
        v_h.set_holder(holder)?;
    }
    Ok(())
}

/// The wrapper currently exposing `addr` as `descriptor` (or as a derived
/// type), if any.
pub fn find_wrapper(addr: NativePtr, descriptor: &TypeDescriptor) -> BindResult<Option<HostObject>> {
    let wrappers = get_internals()?.instances().find(addr);
    for wrapper in wrappers {
        let roots = all_type_info(wrapper.type_())?;
        if roots.iter().any(|root| root.derives_from(descriptor.id())) {
            return Ok(Some(wrapper));
        }
    }
    Ok(None)
}

// ============================================================================
// Typed helpers
// ============================================================================

/// The descriptor of `T` as seen from `scope`.
pub fn descriptor_of<T: NativeType>(scope: Scope) -> BindResult<Arc<TypeDescriptor>> {
    get_internals()?
        .lookup(T::type_hash(), scope)
        .ok_or_else(|| BindError::Unregistered {
            type_name: T::clean_name(),
        })
}

/// Hand a boxed value to the host, which takes ownership.
pub fn cast_boxed<T: NativeType>(value: Box<T>) -> BindResult<HostObject> {
    let descriptor = descriptor_of::<T>(current_scope())?;
    let ptr = NativePtr::from_box(value);
    cast(Some(ptr), &descriptor, ReturnPolicy::TakeOwnership, None, Holder::Empty).inspect_err(|_| {
        // SAFETY: the cast failed before any wrapper took ownership.
        unsafe { (descriptor.vtable().drop)(ptr) }
    })
}

/// Hand a value to the host by value.
pub fn cast_value<T: NativeType>(value: T) -> BindResult<HostObject> {
    cast_boxed(Box::new(value))
}

/// Expose a borrowed value. Automatic policies copy; `Reference` and
/// `ReferenceInternal` make the wrapper borrow `value`, which must then
/// outlive it.
pub fn cast_ref<T: NativeType>(value: &T, policy: ReturnPolicy, parent: Option<&HostObject>) -> BindResult<HostObject> {
    let descriptor = descriptor_of::<T>(current_scope())?;
    cast(
        Some(NativePtr::from_ref(value)),
        &descriptor,
        policy.for_reference(),
        parent,
        Holder::Empty,
    )
}

/// Borrow the `T` inside `src`.
pub fn load_ref<T: NativeType>(src: &HostObject, convert: bool) -> BindResult<&T> {
    let mut caster = TypeCaster::of::<T>(current_scope())?;
    if !caster.load(src, convert)? {
        return Err(BindError::mismatch(caster.type_name(), src.type_name()));
    }
    let ptr = caster.value().ok_or_else(|| BindError::ReferenceCast {
        type_name: caster.type_name(),
    })?;
    // SAFETY: the value lives in `src` (or in a patient of the current frame)
    // for as long as `src` is borrowed.
    Ok(unsafe { ptr.as_ref::<T>() })
}

/// Take the `T` out of `obj`: moved when `obj` is the only reference, copied
/// otherwise.
pub fn take<T: NativeType>(obj: HostObject) -> BindResult<T> {
    let mut caster = TypeCaster::of::<T>(current_scope())?;
    if !caster.load(&obj, false)? {
        return Err(BindError::mismatch(caster.type_name(), obj.type_name()));
    }
    let ptr = caster.value().ok_or_else(|| BindError::ReferenceCast {
        type_name: caster.type_name(),
    })?;
    let descriptor = caster.descriptor().cloned().ok_or_else(|| BindError::Unregistered {
        type_name: caster.type_name(),
    })?;
    let vtable = descriptor.vtable();

    let references = obj.ref_count();
    let ctor = if references == 1 {
        vtable.move_.or(vtable.copy).ok_or_else(|| BindError::NotMovableOrCopyable {
            type_name: descriptor.name().to_string(),
        })?
    } else {
        vtable.copy.ok_or_else(|| BindError::NonUniqueReference {
            type_name: descriptor.name().to_string(),
            count: references,
        })?
    };
    // SAFETY: `ptr` addresses a live T and the constructor boxes a new T.
    let moved = unsafe { ctor(ptr).into_box::<T>() };
    Ok(*moved)
}
