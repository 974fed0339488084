//! Holder-aware casters.
//!
//! [`SharedHolderCaster`] loads a shared owner of a registered value. When
//! the source is a host subclass holding the only reference, the value is
//! released into native ownership so that the host-side extension is not
//! lost when the host drops its last reference.
//!
//! [`UniqueHolderCaster`] moves exclusive ownership out of the host. The
//! source must be handed over in a move container (a single-item list, or an
//! object with an `_is_move_container` attribute and `peek` / `release`
//! methods), or directly through [`Unique::from_host_owned`]. Extraction is
//! all-or-nothing: nothing is mutated until every check has passed, so a
//! value of the wrong type stays where it was for the next overload.
//!
//! The release and reclaim functions installed on registered types live here
//! as well; [`cast`](crate::caster::cast) calls the reclaim side when a
//! released value comes back to the host.

use std::sync::Arc;

use hostbind_core::{BindError, BindResult, HostObject, NativePtr, NativeType, host_detail};
use hostbind_registry::Scope;

use crate::caster::{Loader, TypeCaster};
use crate::descriptor::{ReleaseFn, TypeDescriptor};
use crate::holder::{Holder, NativeBox, Shared, Unique};
use crate::instance::{Instance, ValueAndHolder};
use crate::life_support::current_scope;
use crate::policy::{CasterKind, HolderKind};
use crate::resolve::{LoadType, determine_load_type, get_type_info};

/// Attribute marking an object that implements the move-container protocol.
pub const MOVE_CONTAINER_ATTR: &str = "_is_move_container";

fn not_initialized(descriptor: &TypeDescriptor) -> BindError {
    BindError::NotInitialized {
        type_name: descriptor.name().to_string(),
    }
}

fn holder_mismatch(descriptor: &TypeDescriptor, requested: HolderKind) -> BindError {
    BindError::HolderMismatch {
        type_name: descriptor.name().to_string(),
        detail: format!(
            "registered with a {:?} holder, loaded as {:?}",
            descriptor.holder_kind(),
            requested
        ),
    }
}

// ============================================================================
// Shared holders
// ============================================================================

/// Loads `Shared<T>` from a host wrapper.
#[derive(Debug, Clone)]
pub struct SharedHolderCaster {
    base: TypeCaster,
    holder: Option<Arc<NativeBox>>,
}

impl SharedHolderCaster {
    pub fn new(descriptor: Arc<TypeDescriptor>, scope: Scope) -> Self {
        SharedHolderCaster {
            base: TypeCaster::new(descriptor, scope),
            holder: None,
        }
    }

    pub fn of<T: NativeType>(scope: Scope) -> BindResult<Self> {
        Ok(SharedHolderCaster {
            base: TypeCaster::of::<T>(scope)?,
            holder: None,
        })
    }

    pub fn value(&self) -> Option<NativePtr> {
        self.base.value()
    }

    /// The loaded owner, if a non-null value was loaded.
    pub fn holder(&self) -> Option<&Arc<NativeBox>> {
        self.holder.as_ref()
    }

    /// Convert the loaded state into a typed handle. `None` when none was
    /// loaded in convert mode.
    pub fn into_shared<T: NativeType>(self) -> Option<Shared<T>> {
        let (owner, ptr) = (self.holder?, self.base.value?);
        // SAFETY: `ptr` addresses a T inside the allocation `owner` keeps
        // alive; the caster was created for T.
        Some(unsafe { Shared::from_parts(owner, ptr) })
    }
}

impl Loader for SharedHolderCaster {
    fn caster(&self) -> &TypeCaster {
        &self.base
    }

    fn caster_mut(&mut self) -> &mut TypeCaster {
        &mut self.base
    }

    fn check_holder_compat(&self, descriptor: &TypeDescriptor) -> BindResult<()> {
        if descriptor.holder_kind() != HolderKind::Shared {
            return Err(holder_mismatch(descriptor, HolderKind::Shared));
        }
        Ok(())
    }

    fn load_value(&mut self, src: &HostObject, v_h: ValueAndHolder<'_>, load_type: LoadType) -> BindResult<()> {
        let descriptor = v_h.descriptor();
        let mut release_with = None;
        if src.ref_count() == 1
            && load_type == LoadType::DerivedSingleRoot
            && let Some(lowest) = get_type_info(src.type_())?
            && lowest.host_type() != src.type_()
        {
            if lowest.release_info().can_derive_from_wrapper {
                release_with = Some(lowest);
            } else {
                log::warn!(
                    "the host-side state of a {} subclass instance ({}) is lost when its last host \
                     reference is dropped; give the native type an anchor to keep it alive",
                    lowest.name(),
                    host_detail(src.type_name()),
                );
            }
        }

        if !v_h.holder_constructed() {
            return Err(BindError::NotHeld {
                type_name: descriptor.name().to_string(),
            });
        }
        self.base.value = Some(v_h.value().ok_or_else(|| not_initialized(descriptor))?);
        self.holder = v_h.shared_owner();

        if let Some(lowest) = release_with {
            let release = lowest
                .release_info()
                .release_to_native
                .ok_or_else(|| BindError::NoReleaseMechanism {
                    type_name: lowest.name().to_string(),
                })?;
            // The caster already holds its own owner reference.
            drop(release(&lowest, src.clone(), v_h.index())?);
            log::debug!("released {} into shared native ownership", lowest.name());
        }
        Ok(())
    }

    fn try_implicit_casts(&mut self, src: &HostObject, convert: bool) -> BindResult<bool> {
        let Some(descriptor) = self.base.descriptor.clone() else {
            return Ok(false);
        };
        for (source, upcast) in descriptor.implicit_casts() {
            let mut sub = SharedHolderCaster::new(source, self.base.scope());
            if sub.load(src, convert)? {
                // Aliasing: shares the derived owner, points at the base.
                self.base.value = sub.base.value.map(upcast);
                self.holder = sub.holder;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ============================================================================
// Unique holders
// ============================================================================

/// Loads `Unique<T>` by moving ownership out of the host.
#[derive(Debug)]
pub struct UniqueHolderCaster {
    base: TypeCaster,
    holder: Option<NativeBox>,
}

impl UniqueHolderCaster {
    pub fn new(descriptor: Arc<TypeDescriptor>, scope: Scope) -> Self {
        UniqueHolderCaster {
            base: TypeCaster::new(descriptor, scope),
            holder: None,
        }
    }

    pub fn of<T: NativeType>(scope: Scope) -> BindResult<Self> {
        Ok(UniqueHolderCaster {
            base: TypeCaster::of::<T>(scope)?,
            holder: None,
        })
    }

    pub fn value(&self) -> Option<NativePtr> {
        self.base.value()
    }

    /// Extract from a move container, then take ownership.
    ///
    /// Everything is checked against the borrowed item first; the container
    /// gives up its object only once the load is certain to succeed.
    pub fn load(&mut self, src: &HostObject, _convert: bool) -> BindResult<bool> {
        let Some(descriptor) = self.base.descriptor.clone() else {
            return Ok(false);
        };

        if src.is_list() {
            let items = src.items().unwrap_or_default();
            let [item] = items.as_slice() else {
                return Err(unsupported_container(&descriptor));
            };
            let Some(extraction) = self.plan(&descriptor, item)? else {
                return Ok(false);
            };
            // One reference held by the list, one by `items`.
            ensure_unique(&descriptor, item.ref_count() - 1)?;
            drop(items);
            let obj = src.list_replace(0, HostObject::none())?;
            return self.take(extraction, obj);
        }

        if src.has_attr(MOVE_CONTAINER_ATTR) {
            let target = src.call_method("peek", &[])?;
            if self.plan(&descriptor, &target)?.is_none() {
                return Ok(false);
            }
            drop(target);
            return self.load_exclusive(src.call_method("release", &[])?, false);
        }

        Err(unsupported_container(&descriptor))
    }

    /// Load from a handle the caller gives up. It must be the only reference.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_exclusive(&mut self, obj: HostObject, _convert: bool) -> BindResult<bool> {
        let Some(descriptor) = self.base.descriptor.clone() else {
            return Ok(false);
        };
        let Some(extraction) = self.plan(&descriptor, &obj)? else {
            return Ok(false);
        };
        ensure_unique(&descriptor, obj.ref_count())?;
        self.take(extraction, obj)
    }

    /// Decide what loading `obj` would take, without touching it.
    ///
    /// `None` when `obj` is none or not a `descriptor` value.
    fn plan(&self, descriptor: &Arc<TypeDescriptor>, obj: &HostObject) -> BindResult<Option<Extraction>> {
        if obj.is_none() {
            return Ok(None);
        }
        if descriptor.holder_kind() != HolderKind::Unique {
            return Err(holder_mismatch(descriptor, HolderKind::Unique));
        }

        let lowest = match determine_load_type(obj, descriptor)? {
            LoadType::ConversionNeeded => return Ok(None),
            LoadType::ExactNative => Arc::clone(descriptor),
            _ => get_type_info(obj.type_())?.ok_or_else(|| BindError::NoRegisteredBase {
                host_type: host_detail(obj.type_name()),
            })?,
        };
        let release = lowest
            .release_info()
            .release_to_native
            .filter(|_| lowest.holder_kind() == HolderKind::Unique)
            .ok_or_else(|| BindError::NoReleaseMechanism {
                type_name: lowest.name().to_string(),
            })?;

        let instance = Instance::of(obj).ok_or_else(|| not_initialized(&lowest))?;
        let v_h = instance.value_and_holder(0).ok_or_else(|| not_initialized(&lowest))?;
        if !v_h.holder_constructed() {
            return Err(BindError::NotHeld {
                type_name: lowest.name().to_string(),
            });
        }
        let lowest_ptr = v_h.value().ok_or_else(|| not_initialized(&lowest))?;
        let value = lowest
            .upcast_to(descriptor.id(), lowest_ptr)
            .ok_or_else(|| BindError::mismatch(descriptor.name(), obj.type_name()))?;

        Ok(Some(Extraction { lowest, release, value }))
    }

    fn take(&mut self, extraction: Extraction, obj: HostObject) -> BindResult<bool> {
        let Extraction { lowest, release, value } = extraction;
        match release(&lowest, obj, 0)? {
            Holder::Unique(owner) => {
                log::debug!("moved {} into unique native ownership", lowest.name());
                self.holder = Some(owner);
                self.base.value = Some(value);
                Ok(true)
            }
            _ => Err(holder_mismatch(&lowest, HolderKind::Unique)),
        }
    }

    pub fn into_unique<T: NativeType>(self) -> Option<Unique<T>> {
        let (owner, ptr) = (self.holder?, self.base.value?);
        // SAFETY: `ptr` addresses a T inside the allocation `owner` owns.
        Some(unsafe { Unique::from_parts(owner, ptr) })
    }
}

/// A unique load that passed every check.
struct Extraction {
    lowest: Arc<TypeDescriptor>,
    release: ReleaseFn,
    value: NativePtr,
}

fn ensure_unique(descriptor: &TypeDescriptor, references: usize) -> BindResult<()> {
    if references != 1 {
        return Err(BindError::NonUniqueReference {
            type_name: descriptor.name().to_string(),
            count: references,
        });
    }
    Ok(())
}

fn unsupported_container(descriptor: &TypeDescriptor) -> BindError {
    BindError::UnsupportedMoveContainer {
        type_name: descriptor.name().to_string(),
    }
}

impl<T: NativeType> Unique<T> {
    /// Take ownership of the value wrapped by `obj`, which must be the only
    /// reference to it.
    pub fn from_host_owned(obj: HostObject) -> BindResult<Self> {
        let type_name = obj.type_name().to_string();
        let mut caster = UniqueHolderCaster::of::<T>(current_scope())?;
        if !caster.load_exclusive(obj, false)? {
            return Err(BindError::mismatch(T::clean_name(), &type_name));
        }
        caster
            .into_unique()
            .ok_or_else(|| BindError::mismatch(T::clean_name(), &type_name))
    }
}

impl<T: NativeType> Shared<T> {
    /// Share ownership of the value wrapped by `obj`.
    pub fn from_host(obj: &HostObject) -> BindResult<Self> {
        let mut caster = SharedHolderCaster::of::<T>(current_scope())?;
        if !caster.load(obj, false)? {
            return Err(BindError::mismatch(T::clean_name(), obj.type_name()));
        }
        caster
            .into_shared()
            .ok_or_else(|| BindError::mismatch(T::clean_name(), obj.type_name()))
    }
}

// ============================================================================
// Release and reclaim
// ============================================================================

/// Release for unique holders: the holder leaves the slot and the wrapper
/// stops owning the value. A type with an anchor parks the wrapper in it.
pub(crate) fn release_unique(descriptor: &Arc<TypeDescriptor>, obj: HostObject, slot: usize) -> BindResult<Holder> {
    let (holder, anchored) = {
        let instance = Instance::of(&obj).ok_or_else(|| not_initialized(descriptor))?;
        let v_h = instance
            .value_and_holder(slot)
            .ok_or_else(|| not_initialized(descriptor))?;
        let value = v_h.value().ok_or_else(|| not_initialized(descriptor))?;
        let holder = v_h.release_holder()?;
        instance.set_owned(false);
        // SAFETY: the value stays alive in `holder` for as long as the anchor
        // is used here.
        (holder, unsafe { descriptor.anchor_of(value) })
    };
    match anchored {
        Some(anchor) => anchor.park(obj),
        None => drop(obj),
    }
    Ok(holder)
}

/// Release for shared holders: the wrapper gives up its owner reference and
/// parks itself in the value's anchor, so the host-side state lives as long
/// as native owners do.
pub(crate) fn release_shared(descriptor: &Arc<TypeDescriptor>, obj: HostObject, slot: usize) -> BindResult<Holder> {
    let (holder, anchor) = {
        let instance = Instance::of(&obj).ok_or_else(|| not_initialized(descriptor))?;
        let v_h = instance
            .value_and_holder(slot)
            .ok_or_else(|| not_initialized(descriptor))?;
        let value = v_h.value().ok_or_else(|| not_initialized(descriptor))?;
        // SAFETY: the caller holds another owner reference, so the value
        // outlives this call.
        let anchor = unsafe { descriptor.anchor_of(value) }.ok_or_else(|| BindError::NoReleaseMechanism {
            type_name: descriptor.name().to_string(),
        })?;
        let holder = v_h.release_holder()?;
        instance.set_owned(false);
        (holder, anchor)
    };
    anchor.park(obj);
    Ok(holder)
}

/// Give a released holder back to its wrapper and let go of the anchor.
pub(crate) fn reclaim(
    descriptor: &Arc<TypeDescriptor>,
    wrapper: &HostObject,
    slot: usize,
    holder: Holder,
) -> BindResult<HostObject> {
    if holder.is_empty() {
        return Err(BindError::MissingHolder {
            type_name: descriptor.name().to_string(),
        });
    }
    let parked = {
        let instance = Instance::of(wrapper).ok_or_else(|| not_initialized(descriptor))?;
        let v_h = instance
            .value_and_holder(slot)
            .ok_or_else(|| not_initialized(descriptor))?;
        let value = v_h.value().ok_or_else(|| not_initialized(descriptor))?;
        v_h.set_holder(holder)?;
        instance.set_owned(true);
        // SAFETY: the slot's holder now keeps the value alive.
        unsafe { descriptor.anchor_of(value) }.and_then(|anchor| anchor.take())
    };
    let result = wrapper.clone();
    drop(parked);
    Ok(result)
}

// ============================================================================
// Dispatch
// ============================================================================

/// A value loaded with the strategy its descriptor selects.
#[derive(Debug)]
pub enum Loaded {
    /// A bare pointer; `None` after loading none in convert mode.
    Value(Option<NativePtr>),
    Shared(NativePtr, Arc<NativeBox>),
    Unique(NativePtr, NativeBox),
}

/// Load `src` as `descriptor` using the descriptor's caster kind.
pub fn load_held(
    src: &HostObject,
    descriptor: &Arc<TypeDescriptor>,
    scope: Scope,
    convert: bool,
) -> BindResult<Option<Loaded>> {
    let descriptor = Arc::clone(descriptor);
    match descriptor.caster_kind() {
        CasterKind::HolderCopyable => {
            let mut caster = SharedHolderCaster::new(descriptor, scope);
            if !caster.load(src, convert)? {
                return Ok(None);
            }
            Ok(Some(match (caster.base.value, caster.holder) {
                (Some(value), Some(owner)) => Loaded::Shared(value, owner),
                (value, _) => Loaded::Value(value),
            }))
        }
        CasterKind::HolderMoveOnly => {
            let mut caster = UniqueHolderCaster::new(descriptor, scope);
            if !caster.load(src, convert)? {
                return Ok(None);
            }
            Ok(match (caster.base.value, caster.holder) {
                (Some(value), Some(owner)) => Some(Loaded::Unique(value, owner)),
                _ => None,
            })
        }
        _ => {
            let mut caster = TypeCaster::new(descriptor, scope);
            Ok(caster.load(src, convert)?.then(|| Loaded::Value(caster.value())))
        }
    }
}
