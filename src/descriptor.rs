//! Type descriptors.
//!
//! A [`TypeDescriptor`] is everything the binding layer knows about one
//! registered native type: its identity, the host type created for it, the
//! type-erased operations in its vtable, its registered native bases and the
//! conversion tables consulted when a host value does not match directly.
//!
//! Descriptors are created once by the class builder and then shared through
//! `Arc` for the life of the process. The conversion tables are behind locks
//! because registering a derived type (or an implicit conversion) appends to
//! an existing descriptor.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use hostbind_core::{BindResult, HostObject, HostType, NativePtr, NativeVTable, RuntimeTypeFn, TypeHash, UpcastFn};
use hostbind_registry::ModuleId;

use crate::holder::{Holder, NativeBox};
use crate::policy::{CasterKind, HolderKind};
use crate::trampoline::HostAnchor;

/// Builds a temporary host value convertible to the target type, or `None`
/// when the source is not applicable.
pub type ImplicitConversion = Arc<dyn Fn(&HostObject) -> BindResult<Option<HostObject>> + Send + Sync>;

/// Extracts a native pointer from a host value without going through the
/// registered-instance machinery.
pub type DirectConversion = Arc<dyn Fn(&HostObject) -> Option<NativePtr> + Send + Sync>;

/// Hands the holder of slot `index` of the wrapper to native code.
///
/// Consumes the caller's reference to the wrapper.
pub type ReleaseFn = fn(&Arc<TypeDescriptor>, HostObject, usize) -> BindResult<Holder>;

/// Gives a previously released holder back to the wrapper it came from.
pub type ReclaimFn = fn(&Arc<TypeDescriptor>, &HostObject, usize, Holder) -> BindResult<HostObject>;

/// Locates the anchor embedded in a native value.
pub type AnchorFn = unsafe fn(NativePtr) -> *const HostAnchor;

/// How ownership of a registered type moves between host and native code.
#[derive(Clone, Copy)]
pub struct ReleaseInfo {
    pub holder: HolderKind,
    /// The native type embeds an anchor that can hold its own wrapper.
    pub can_derive_from_wrapper: bool,
    pub release_to_native: Option<ReleaseFn>,
    pub reclaim: Option<ReclaimFn>,
}

impl ReleaseInfo {
    /// A type without a holder; nothing can be released.
    pub const fn plain() -> Self {
        ReleaseInfo {
            holder: HolderKind::None,
            can_derive_from_wrapper: false,
            release_to_native: None,
            reclaim: None,
        }
    }
}

impl fmt::Debug for ReleaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseInfo")
            .field("holder", &self.holder)
            .field("can_derive_from_wrapper", &self.can_derive_from_wrapper)
            .field("release", &self.release_to_native.is_some())
            .field("reclaim", &self.reclaim.is_some())
            .finish()
    }
}

/// A registered native base of a descriptor.
#[derive(Clone)]
pub struct BaseLink {
    pub descriptor: Arc<TypeDescriptor>,
    pub upcast: UpcastFn,
    /// Byte offset of the base sub-object, measured at registration.
    pub offset: isize,
}

struct ImplicitCast {
    source: Weak<TypeDescriptor>,
    convert: UpcastFn,
}

/// Construction parameters for a [`TypeDescriptor`].
pub struct DescriptorParts {
    pub id: TypeHash,
    pub native_name: &'static str,
    pub name: String,
    pub host_type: HostType,
    pub vtable: NativeVTable,
    pub bases: Vec<BaseLink>,
    pub release: ReleaseInfo,
    pub module: Option<ModuleId>,
    pub runtime_type: Option<RuntimeTypeFn>,
    pub anchor: Option<AnchorFn>,
}

/// Per-type record of a registered native type.
pub struct TypeDescriptor {
    id: TypeHash,
    native_name: &'static str,
    name: String,
    host_type: HostType,
    vtable: NativeVTable,
    holder_size: usize,
    slot_size: usize,
    simple_type: AtomicBool,
    bases: Vec<BaseLink>,
    implicit_casts: RwLock<Vec<ImplicitCast>>,
    implicit_conversions: RwLock<Vec<ImplicitConversion>>,
    direct_conversions: RwLock<Vec<DirectConversion>>,
    release: ReleaseInfo,
    module: Option<ModuleId>,
    caster_kind: CasterKind,
    runtime_type: Option<RuntimeTypeFn>,
    anchor: Option<AnchorFn>,
}

/// Size of the holder a slot stores for `kind`.
pub fn holder_size(kind: HolderKind) -> usize {
    match kind {
        HolderKind::None => 0,
        HolderKind::Unique => size_of::<NativeBox>(),
        HolderKind::Shared => size_of::<Arc<NativeBox>>(),
    }
}

/// Bytes one slot needs: the value pointer plus the holder, rounded up to
/// pointer alignment.
pub fn slot_size(kind: HolderKind) -> usize {
    let align = align_of::<usize>();
    (size_of::<usize>() + holder_size(kind)).div_ceil(align) * align
}

impl TypeDescriptor {
    /// Build a descriptor. Simplicity starts from the base list: a type is
    /// simple when it has at most one base, that base is simple and sits at
    /// offset zero.
    pub fn new(parts: DescriptorParts) -> Self {
        let simple = match parts.bases.as_slice() {
            [] => true,
            [base] => base.offset == 0 && base.descriptor.is_simple_type(),
            _ => false,
        };
        let holder = parts.release.holder;

        TypeDescriptor {
            id: parts.id,
            native_name: parts.native_name,
            name: parts.name,
            host_type: parts.host_type,
            vtable: parts.vtable,
            holder_size: holder_size(holder),
            slot_size: slot_size(holder),
            simple_type: AtomicBool::new(simple),
            bases: parts.bases,
            implicit_casts: RwLock::new(Vec::new()),
            implicit_conversions: RwLock::new(Vec::new()),
            direct_conversions: RwLock::new(Vec::new()),
            release: parts.release,
            module: parts.module,
            caster_kind: CasterKind::for_holder(holder),
            runtime_type: parts.runtime_type,
            anchor: parts.anchor,
        }
    }

    // ==========================================================================
    // Identity
    // ==========================================================================

    pub fn id(&self) -> TypeHash {
        self.id
    }

    /// Full native type name, as reported by the compiler.
    pub fn native_name(&self) -> &'static str {
        self.native_name
    }

    /// Name the type was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_type(&self) -> &HostType {
        &self.host_type
    }

    pub fn vtable(&self) -> &NativeVTable {
        &self.vtable
    }

    pub fn is_copyable(&self) -> bool {
        self.vtable.copy.is_some()
    }

    pub fn is_movable(&self) -> bool {
        self.vtable.move_.is_some()
    }

    // ==========================================================================
    // Layout
    // ==========================================================================

    pub fn holder_kind(&self) -> HolderKind {
        self.release.holder
    }

    pub fn holder_size(&self) -> usize {
        self.holder_size
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Whether a pointer to this type may be reinterpreted as a pointer to
    /// any of its bases.
    pub fn is_simple_type(&self) -> bool {
        self.simple_type.load(Ordering::Acquire)
    }

    /// Clear the simple flag on this type and every type it derives from.
    pub fn mark_non_simple(&self) {
        self.simple_type.store(false, Ordering::Release);
        for base in &self.bases {
            base.descriptor.mark_non_simple();
        }
    }

    pub fn bases(&self) -> &[BaseLink] {
        &self.bases
    }

    /// Whether `id` is this type or one of its registered bases.
    pub fn derives_from(&self, id: TypeHash) -> bool {
        self.id == id || self.bases.iter().any(|b| b.descriptor.derives_from(id))
    }

    /// Adjust `ptr` from this type to the base sub-object identified by
    /// `target`, searching depth first.
    pub fn upcast_to(&self, target: TypeHash, ptr: NativePtr) -> Option<NativePtr> {
        if self.id == target {
            return Some(ptr);
        }
        self.bases
            .iter()
            .find_map(|base| base.descriptor.upcast_to(target, (base.upcast)(ptr)))
    }

    /// Visit every base sub-object address that differs from `ptr`.
    pub fn for_each_offset_base(&self, ptr: NativePtr, f: &mut dyn FnMut(NativePtr)) {
        for base in &self.bases {
            let base_ptr = (base.upcast)(ptr);
            if base_ptr != ptr {
                f(base_ptr);
            }
            base.descriptor.for_each_offset_base(base_ptr, f);
        }
    }

    // ==========================================================================
    // Conversion tables
    // ==========================================================================

    /// Register `source` as implicitly castable to this type.
    pub fn add_implicit_cast(&self, source: &Arc<TypeDescriptor>, convert: UpcastFn) {
        self.implicit_casts.write().push(ImplicitCast {
            source: Arc::downgrade(source),
            convert,
        });
    }

    /// Live implicit-cast sources, in registration order.
    pub fn implicit_casts(&self) -> Vec<(Arc<TypeDescriptor>, UpcastFn)> {
        self.implicit_casts
            .read()
            .iter()
            .filter_map(|cast| cast.source.upgrade().map(|source| (source, cast.convert)))
            .collect()
    }

    pub fn add_implicit_conversion(&self, conversion: ImplicitConversion) {
        self.implicit_conversions.write().push(conversion);
    }

    /// Snapshot of the implicit conversions, so none run under the lock.
    pub fn implicit_conversions(&self) -> Vec<ImplicitConversion> {
        self.implicit_conversions.read().clone()
    }

    pub fn add_direct_conversion(&self, conversion: DirectConversion) {
        self.direct_conversions.write().push(conversion);
    }

    pub fn direct_conversions(&self) -> Vec<DirectConversion> {
        self.direct_conversions.read().clone()
    }

    /// Drop every conversion closure. Closures can capture descriptors and
    /// host types, so teardown clears them to break the cycles.
    pub(crate) fn clear_conversions(&self) {
        let casts = std::mem::take(&mut *self.implicit_casts.write());
        let conversions = std::mem::take(&mut *self.implicit_conversions.write());
        let direct = std::mem::take(&mut *self.direct_conversions.write());
        drop((casts, conversions, direct));
    }

    // ==========================================================================
    // Ownership
    // ==========================================================================

    pub fn release_info(&self) -> &ReleaseInfo {
        &self.release
    }

    pub fn is_module_local(&self) -> bool {
        self.module.is_some()
    }

    /// Module the type is local to.
    pub fn module(&self) -> Option<ModuleId> {
        self.module
    }

    pub fn caster_kind(&self) -> CasterKind {
        self.caster_kind
    }

    pub fn runtime_type(&self) -> Option<RuntimeTypeFn> {
        self.runtime_type
    }

    pub fn has_anchor(&self) -> bool {
        self.anchor.is_some()
    }

    /// The anchor embedded in the value at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must address a live value of this type, and the returned
    /// reference must not outlive it.
    pub unsafe fn anchor_of<'a>(&self, ptr: NativePtr) -> Option<&'a HostAnchor> {
        let anchor = self.anchor?;
        // SAFETY: forwarded to the caller.
        unsafe { anchor(ptr).as_ref() }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("host_type", &self.host_type)
            .field("holder", &self.release.holder)
            .field("simple", &self.is_simple_type())
            .field("bases", &self.bases.len())
            .field("module", &self.module)
            .finish()
    }
}
