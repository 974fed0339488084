//! Instance layout.
//!
//! A wrapper of native values carries an [`Instance`] as its extension
//! payload: one slot per registered native root of its host type, in
//! resolution order. Each slot stores the value pointer, the holder that owns
//! it (if any) and status bits.
//!
//! Types with exactly one root whose holder fits [`INLINE_HOLDER_BUDGET`] use
//! the simple layout with the slot stored inline; everything else gets a
//! boxed slot array.
//!
//! [`ValueAndHolder`] is the short-lived view over one slot used by the
//! casters. It borrows the instance and cannot outlive it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use parking_lot::Mutex;

use hostbind_core::{AllocFn, BindError, BindResult, HostObject, HostType, NativeData, NativePtr, Payload, host_detail};
use hostbind_registry::InstanceKey;

use crate::descriptor::TypeDescriptor;
use crate::holder::{Holder, HolderState, NativeBox};
use crate::internals::get_internals;
use crate::policy::HolderKind;
use crate::resolve::all_type_info;

/// Largest holder, in bytes, stored in the simple inline layout.
pub const INLINE_HOLDER_BUDGET: usize = 3 * size_of::<usize>();

bitflags! {
    /// Per-slot status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotStatus: u8 {
        const HOLDER_CONSTRUCTED = 1 << 0;
        const INSTANCE_REGISTERED = 1 << 1;
        const HOLDER_RELEASED = 1 << 2;
    }
}

/// One (value, holder, status) record.
#[derive(Debug, Default)]
pub struct Slot {
    value: Option<NativePtr>,
    holder: Holder,
    status: SlotStatus,
}

/// Slot storage of an instance.
#[derive(Debug)]
pub enum InstanceLayout {
    Simple(Slot),
    General(Box<[Slot]>),
}

impl InstanceLayout {
    /// Lay out slots for `roots`.
    pub fn allocate(roots: &[Arc<TypeDescriptor>]) -> BindResult<Self> {
        match roots {
            [] => Err(BindError::NoRegisteredBase {
                host_type: String::from("<unknown>"),
            }),
            [root] if root.holder_size() <= INLINE_HOLDER_BUDGET => Ok(InstanceLayout::Simple(Slot::default())),
            _ => {
                let mut slots = Vec::new();
                slots
                    .try_reserve_exact(roots.len())
                    .map_err(|_| BindError::LayoutAllocation {
                        bytes: Self::byte_size(roots),
                    })?;
                slots.resize_with(roots.len(), Slot::default);
                Ok(InstanceLayout::General(slots.into_boxed_slice()))
            }
        }
    }

    /// Footprint of the general layout for `roots`: slot sizes plus one status
    /// byte per slot, rounded up to pointer alignment.
    pub fn byte_size(roots: &[Arc<TypeDescriptor>]) -> usize {
        let align = align_of::<usize>();
        let slots: usize = roots.iter().map(|root| root.slot_size()).sum();
        let status = roots.len().div_ceil(align) * align;
        slots + status
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, InstanceLayout::Simple(_))
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> &[Slot] {
        match self {
            InstanceLayout::Simple(slot) => std::slice::from_ref(slot),
            InstanceLayout::General(slots) => slots,
        }
    }

    pub fn slots_mut(&mut self) -> &mut [Slot] {
        match self {
            InstanceLayout::Simple(slot) => std::slice::from_mut(slot),
            InstanceLayout::General(slots) => slots,
        }
    }
}

/// Native payload of a wrapper.
pub struct Instance {
    roots: Arc<[Arc<TypeDescriptor>]>,
    layout: Mutex<InstanceLayout>,
    owned: AtomicBool,
}

impl NativeData for Instance {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Instance {
    /// Allocate the layout for a new instance of `host_type`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn allocate(host_type: &HostType) -> BindResult<Self> {
        let roots = all_type_info(host_type)?;
        if roots.is_empty() {
            return Err(BindError::NoRegisteredBase {
                host_type: host_detail(host_type.name()),
            });
        }
        let layout = InstanceLayout::allocate(&roots)?;
        Ok(Instance {
            roots,
            layout: Mutex::new(layout),
            owned: AtomicBool::new(false),
        })
    }

    /// The instance inside a wrapper, if `obj` wraps native values.
    pub fn of(obj: &HostObject) -> Option<&Instance> {
        obj.native_data::<Instance>()
    }

    /// Identity used for instance index entries.
    pub fn key(&self) -> InstanceKey {
        InstanceKey(self as *const Instance as usize)
    }

    /// Registered roots, in slot order.
    pub fn roots(&self) -> &Arc<[Arc<TypeDescriptor>]> {
        &self.roots
    }

    pub fn is_simple_layout(&self) -> bool {
        self.layout.lock().is_simple()
    }

    pub fn slot_count(&self) -> usize {
        self.roots.len()
    }

    /// Whether the wrapper is responsible for freeing its values.
    pub fn owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    pub fn set_owned(&self, owned: bool) {
        self.owned.store(owned, Ordering::Release);
    }

    pub fn byte_size(&self) -> usize {
        match &*self.layout.lock() {
            InstanceLayout::Simple(_) => self.roots[0].slot_size(),
            InstanceLayout::General(_) => InstanceLayout::byte_size(&self.roots),
        }
    }

    /// View of slot `index`.
    pub fn value_and_holder(&self, index: usize) -> Option<ValueAndHolder<'_>> {
        (index < self.roots.len()).then_some(ValueAndHolder { instance: self, index })
    }

    /// View of the slot belonging to `descriptor`.
    pub fn value_and_holder_for(&self, descriptor: &TypeDescriptor) -> Option<ValueAndHolder<'_>> {
        let index = self.roots.iter().position(|root| root.id() == descriptor.id())?;
        self.value_and_holder(index)
    }

    /// Views of every slot, in order.
    pub fn values_and_holders(&self) -> impl Iterator<Item = ValueAndHolder<'_>> {
        (0..self.roots.len()).map(move |index| ValueAndHolder { instance: self, index })
    }

    /// Index every constructed, not yet registered slot of `wrapper`, along
    /// with its base sub-objects at non-zero offsets.
    pub(crate) fn register(&self, wrapper: &HostObject) -> BindResult<()> {
        let internals = get_internals()?;
        let key = self.key();
        let mut layout = self.layout.lock();
        let mut index = internals.instances();

        for (slot, root) in layout.slots_mut().iter_mut().zip(self.roots.iter()) {
            let Some(value) = slot.value else { continue };
            if slot.status.contains(SlotStatus::INSTANCE_REGISTERED) {
                continue;
            }
            index.register(value, wrapper.downgrade(), key);
            root.for_each_offset_base(value, &mut |base| index.register(base, wrapper.downgrade(), key));
            slot.status.insert(SlotStatus::INSTANCE_REGISTERED);
        }
        Ok(())
    }

    fn with_slot<R>(&self, index: usize, f: impl FnOnce(&mut Slot) -> R) -> R {
        let mut layout = self.layout.lock();
        f(&mut layout.slots_mut()[index])
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let key = self.key();
        let owned = *self.owned.get_mut();
        let layout = self.layout.get_mut();

        if let Ok(internals) = get_internals() {
            let mut index = internals.instances();
            for (slot, root) in layout.slots().iter().zip(self.roots.iter()) {
                if !slot.status.contains(SlotStatus::INSTANCE_REGISTERED) {
                    continue;
                }
                if let Some(value) = slot.value {
                    index.deregister(value, key);
                    root.for_each_offset_base(value, &mut |base| {
                        index.deregister(base, key);
                    });
                }
            }
        }

        let mut holders = Vec::new();
        for (slot, root) in layout.slots_mut().iter_mut().zip(self.roots.iter()) {
            if slot.status.contains(SlotStatus::HOLDER_CONSTRUCTED) {
                holders.push(slot.holder.take());
            } else if owned
                && !slot.status.contains(SlotStatus::HOLDER_RELEASED)
                && let Some(value) = slot.value.take()
            {
                // SAFETY: an owned value without a holder was boxed for this
                // root's type and nothing else frees it.
                unsafe { (root.vtable().drop)(value) };
            }
        }
        drop(holders);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("roots", &self.roots.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("owned", &self.owned())
            .finish()
    }
}

/// Allocation hook installed on every registered host type.
pub fn instance_allocator() -> AllocFn {
    Arc::new(|host_type: &HostType| Ok(Payload::Native(Box::new(Instance::allocate(host_type)?))))
}

// ============================================================================
// ValueAndHolder
// ============================================================================

/// Non-owning view of one slot.
#[derive(Clone, Copy)]
pub struct ValueAndHolder<'a> {
    instance: &'a Instance,
    index: usize,
}

impl<'a> ValueAndHolder<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn instance(&self) -> &'a Instance {
        self.instance
    }

    pub fn descriptor(&self) -> &'a Arc<TypeDescriptor> {
        &self.instance.roots[self.index]
    }

    pub fn value(&self) -> Option<NativePtr> {
        self.instance.with_slot(self.index, |slot| slot.value)
    }

    pub fn set_value(&self, value: Option<NativePtr>) {
        self.instance.with_slot(self.index, |slot| slot.value = value);
    }

    pub fn status(&self) -> SlotStatus {
        self.instance.with_slot(self.index, |slot| slot.status)
    }

    pub fn holder_constructed(&self) -> bool {
        self.status().contains(SlotStatus::HOLDER_CONSTRUCTED)
    }

    pub fn instance_registered(&self) -> bool {
        self.status().contains(SlotStatus::INSTANCE_REGISTERED)
    }

    pub fn holder_state(&self) -> HolderState {
        let status = self.status();
        if status.contains(SlotStatus::HOLDER_CONSTRUCTED) {
            HolderState::Constructed
        } else if status.contains(SlotStatus::HOLDER_RELEASED) {
            HolderState::Released
        } else {
            HolderState::Uninitialized
        }
    }

    pub fn holder_kind(&self) -> HolderKind {
        self.instance.with_slot(self.index, |slot| slot.holder.kind())
    }

    /// A new reference to the slot's shared owner.
    pub fn shared_owner(&self) -> Option<Arc<NativeBox>> {
        self.instance.with_slot(self.index, |slot| slot.holder.shared_owner())
    }

    /// Install `holder`. Only an uninitialized or released slot accepts one.
    pub(crate) fn set_holder(&self, holder: Holder) -> BindResult<()> {
        let descriptor = self.descriptor();
        self.instance.with_slot(self.index, |slot| {
            if slot.status.contains(SlotStatus::HOLDER_CONSTRUCTED) {
                return Err(BindError::InconsistentOwnership {
                    type_name: descriptor.name().to_string(),
                });
            }
            slot.holder = holder;
            slot.status.insert(SlotStatus::HOLDER_CONSTRUCTED);
            slot.status.remove(SlotStatus::HOLDER_RELEASED);
            Ok(())
        })
    }

    /// Move the constructed holder out, leaving the slot released.
    pub(crate) fn release_holder(&self) -> BindResult<Holder> {
        let descriptor = self.descriptor();
        self.instance.with_slot(self.index, |slot| {
            if !slot.status.contains(SlotStatus::HOLDER_CONSTRUCTED) {
                return Err(BindError::NotHeld {
                    type_name: descriptor.name().to_string(),
                });
            }
            slot.status.remove(SlotStatus::HOLDER_CONSTRUCTED);
            slot.status.insert(SlotStatus::HOLDER_RELEASED);
            Ok(slot.holder.take())
        })
    }
}

impl fmt::Debug for ValueAndHolder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAndHolder")
            .field("type", &self.descriptor().name())
            .field("index", &self.index)
            .field("value", &self.value())
            .field("state", &self.holder_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorParts, ReleaseInfo};
    use hostbind_core::{NativeType, NativeVTable};

    struct Marker;
    impl NativeType for Marker {}

    fn root(holder: HolderKind) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor::new(DescriptorParts {
            id: Marker::type_hash(),
            native_name: Marker::type_name(),
            name: "Marker".to_string(),
            host_type: HostType::new_class("Marker", &[]).unwrap(),
            vtable: NativeVTable::of::<Marker>(),
            bases: vec![],
            release: ReleaseInfo {
                holder,
                ..ReleaseInfo::plain()
            },
            module: None,
            runtime_type: None,
            anchor: None,
        }))
    }

    #[test]
    fn empty_roots_fail() {
        let err = InstanceLayout::allocate(&[]).unwrap_err();
        assert!(matches!(err, BindError::NoRegisteredBase { .. }));
    }

    #[test]
    fn single_root_is_simple() {
        let layout = InstanceLayout::allocate(&[root(HolderKind::Shared)]).unwrap();
        assert!(layout.is_simple());
        assert_eq!(layout.len(), 1);
    }

    #[test]
    fn multiple_roots_are_general_and_zeroed() {
        let roots = [root(HolderKind::None), root(HolderKind::Unique)];
        let layout = InstanceLayout::allocate(&roots).unwrap();
        assert!(!layout.is_simple());
        assert_eq!(layout.len(), 2);
        for slot in layout.slots() {
            assert!(slot.value.is_none());
            assert!(slot.holder.is_empty());
            assert!(slot.status.is_empty());
        }
    }

    #[test]
    fn general_byte_size_counts_status() {
        let roots = [root(HolderKind::None), root(HolderKind::Shared)];
        let word = size_of::<usize>();
        assert_eq!(InstanceLayout::byte_size(&roots), word + 2 * word + word);
    }
}
