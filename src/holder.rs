//! Ownership holders.
//!
//! A holder owns a native allocation through its type-erased destructor. The
//! erased [`Holder`] lives in instance slots; the typed [`Unique`] and
//! [`Shared`] handles are what native code works with. Both typed handles
//! separate the *owner* (the allocation that will be freed) from the *pointer*
//! they dereference, so a handle to a base sub-object keeps the whole derived
//! allocation alive.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use hostbind_core::{DropFn, NativePtr, NativeType, UpcastFn, drop_boxed};

use crate::policy::HolderKind;

/// Owning pointer to a native allocation with a type-erased destructor.
pub struct NativeBox {
    ptr: NativePtr,
    drop: DropFn,
}

impl NativeBox {
    /// Box a value.
    pub fn new<T: NativeType>(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    pub fn from_box<T: NativeType>(value: Box<T>) -> Self {
        NativeBox {
            ptr: NativePtr::from_box(value),
            drop: drop_boxed::<T>,
        }
    }

    /// Take ownership of a raw allocation.
    ///
    /// # Safety
    ///
    /// `drop` must be the matching destructor for `ptr`, and nothing else may
    /// free `ptr`.
    pub unsafe fn from_raw(ptr: NativePtr, drop: DropFn) -> Self {
        NativeBox { ptr, drop }
    }

    /// Address of the owned allocation.
    pub fn as_ptr(&self) -> NativePtr {
        self.ptr
    }

    /// Give up ownership without freeing.
    pub fn into_raw(self) -> NativePtr {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for NativeBox {
    fn drop(&mut self) {
        // SAFETY: constructed from a matching (ptr, drop) pair and freed once.
        unsafe { (self.drop)(self.ptr) }
    }
}

impl fmt::Debug for NativeBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeBox({:?})", self.ptr)
    }
}

/// Type-erased holder stored in an instance slot.
#[derive(Debug, Default)]
pub enum Holder {
    #[default]
    Empty,
    Unique(NativeBox),
    Shared(Arc<NativeBox>),
}

impl Holder {
    /// Construct the holder a freshly owned value gets for `kind`.
    ///
    /// # Safety
    ///
    /// Same contract as [`NativeBox::from_raw`].
    pub unsafe fn for_value(kind: HolderKind, ptr: NativePtr, drop: DropFn) -> Self {
        // SAFETY: forwarded to the caller.
        match kind {
            // No holder for this kind: the caller keeps ownership.
            HolderKind::None => Holder::Empty,
            HolderKind::Unique => Holder::Unique(unsafe { NativeBox::from_raw(ptr, drop) }),
            HolderKind::Shared => Holder::Shared(Arc::new(unsafe { NativeBox::from_raw(ptr, drop) })),
        }
    }

    pub fn kind(&self) -> HolderKind {
        match self {
            Holder::Empty => HolderKind::None,
            Holder::Unique(_) => HolderKind::Unique,
            Holder::Shared(_) => HolderKind::Shared,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Holder::Empty)
    }

    /// Move the holder out, leaving `Empty`.
    pub fn take(&mut self) -> Holder {
        std::mem::take(self)
    }

    /// A new reference to a shared owner.
    pub fn shared_owner(&self) -> Option<Arc<NativeBox>> {
        match self {
            Holder::Shared(owner) => Some(Arc::clone(owner)),
            _ => None,
        }
    }
}

/// Lifecycle of the holder in one instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderState {
    Uninitialized,
    Constructed,
    /// Ownership was handed to native code. Only a reclaim leaves this state.
    Released,
}

// ============================================================================
// Unique
// ============================================================================

/// Exclusive owner of a native value, the counterpart of `Box<T>` that can
/// point into a derived allocation.
pub struct Unique<T: NativeType> {
    owner: NativeBox,
    ptr: NativePtr,
    _marker: PhantomData<T>,
}

impl<T: NativeType> Unique<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    pub fn from_box(value: Box<T>) -> Self {
        let owner = NativeBox::from_box(value);
        let ptr = owner.as_ptr();
        Unique {
            owner,
            ptr,
            _marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `ptr` must address a live `T` inside the allocation owned by `owner`.
    pub(crate) unsafe fn from_parts(owner: NativeBox, ptr: NativePtr) -> Self {
        Unique {
            owner,
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_parts(self) -> (NativeBox, NativePtr) {
        (self.owner, self.ptr)
    }

    /// Address of the `T` this handle points at.
    pub fn as_native_ptr(&self) -> NativePtr {
        self.ptr
    }

    /// Address of the owned allocation.
    pub fn owner_ptr(&self) -> NativePtr {
        self.owner.as_ptr()
    }

    /// Convert into a handle to a base sub-object, keeping ownership of the
    /// whole allocation.
    ///
    /// # Safety
    ///
    /// `upcast` must map the address of a `T` to the address of a `B` inside
    /// that same `T`.
    pub unsafe fn upcast<B: NativeType>(self, upcast: UpcastFn) -> Unique<B> {
        let ptr = upcast(self.ptr);
        Unique {
            owner: self.owner,
            ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: NativeType> Deref for Unique<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `ptr` addresses a live T owned by `owner`.
        unsafe { self.ptr.as_ref::<T>() }
    }
}

impl<T: NativeType> DerefMut for Unique<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: exclusive ownership of the allocation.
        unsafe { self.ptr.as_mut::<T>() }
    }
}

impl<T: NativeType + fmt::Debug> fmt::Debug for Unique<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unique").field(&**self).finish()
    }
}

// ============================================================================
// Shared
// ============================================================================

/// Shared owner of a native value, the counterpart of `Arc<T>` that can
/// alias a base sub-object of a derived allocation.
pub struct Shared<T: NativeType> {
    owner: Arc<NativeBox>,
    ptr: NativePtr,
    _marker: PhantomData<T>,
}

impl<T: NativeType> Shared<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    pub fn from_box(value: Box<T>) -> Self {
        let owner = Arc::new(NativeBox::from_box(value));
        let ptr = owner.as_ptr();
        Shared {
            owner,
            ptr,
            _marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `ptr` must address a live `T` inside the allocation owned by `owner`.
    pub(crate) unsafe fn from_parts(owner: Arc<NativeBox>, ptr: NativePtr) -> Self {
        Shared {
            owner,
            ptr,
            _marker: PhantomData,
        }
    }

    pub(crate) fn owner(&self) -> &Arc<NativeBox> {
        &self.owner
    }

    pub fn as_native_ptr(&self) -> NativePtr {
        self.ptr
    }

    /// Number of shared owners of the allocation.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.owner)
    }

    /// Whether both handles share one allocation.
    pub fn same_owner<U: NativeType>(&self, other: &Shared<U>) -> bool {
        Arc::ptr_eq(&self.owner, &other.owner)
    }

    /// A handle to a base sub-object sharing ownership with `self`.
    ///
    /// # Safety
    ///
    /// `upcast` must map the address of a `T` to the address of a `B` inside
    /// that same `T`.
    pub unsafe fn alias<B: NativeType>(&self, upcast: UpcastFn) -> Shared<B> {
        Shared {
            owner: Arc::clone(&self.owner),
            ptr: upcast(self.ptr),
            _marker: PhantomData,
        }
    }
}

impl<T: NativeType> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared {
            owner: Arc::clone(&self.owner),
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: NativeType> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `ptr` addresses a live T kept alive by `owner`.
        unsafe { self.ptr.as_ref::<T>() }
    }
}

impl<T: NativeType + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default)]
    struct Tracked(u32);

    impl NativeType for Tracked {}

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[repr(C)]
    struct Outer {
        tag: u64,
        inner: Inner,
    }

    #[repr(C)]
    #[derive(Debug)]
    struct Inner {
        value: u32,
    }

    impl NativeType for Outer {}
    impl NativeType for Inner {}

    fn outer_to_inner(ptr: NativePtr) -> NativePtr {
        ptr.byte_offset(std::mem::offset_of!(Outer, inner) as isize)
    }

    #[test]
    fn native_box_frees_once() {
        let before = DROPS.load(Ordering::SeqCst);
        let boxed = NativeBox::new(Tracked(1));
        drop(boxed);
        assert_eq!(DROPS.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn holder_for_value_by_kind() {
        let ptr = NativePtr::from_box(Box::new(Tracked(2)));
        let holder = unsafe { Holder::for_value(HolderKind::Shared, ptr, drop_boxed::<Tracked>) };
        assert_eq!(holder.kind(), HolderKind::Shared);
        assert!(holder.shared_owner().is_some());

        let ptr = NativePtr::from_box(Box::new(Tracked(3)));
        let holder = unsafe { Holder::for_value(HolderKind::None, ptr, drop_boxed::<Tracked>) };
        assert!(holder.is_empty());
        unsafe { drop_boxed::<Tracked>(ptr) };
    }

    #[test]
    fn holder_take_leaves_empty() {
        let mut holder = Holder::Unique(NativeBox::new(Tracked(4)));
        let taken = holder.take();
        assert!(holder.is_empty());
        assert_eq!(taken.kind(), HolderKind::Unique);
    }

    #[test]
    fn unique_upcast_points_into_owner() {
        let outer = Unique::new(Outer {
            tag: 9,
            inner: Inner { value: 5 },
        });
        assert_eq!(outer.tag, 9);
        let owner = outer.owner_ptr();
        // SAFETY: `outer_to_inner` returns the address of `Outer::inner`.
        let inner: Unique<Inner> = unsafe { outer.upcast(outer_to_inner) };

        assert_eq!(inner.value, 5);
        assert_eq!(inner.owner_ptr(), owner);
        assert_ne!(inner.as_native_ptr(), owner);
    }

    #[test]
    fn shared_alias_shares_ownership() {
        let outer = Shared::new(Outer {
            tag: 1,
            inner: Inner { value: 7 },
        });
        // SAFETY: `outer_to_inner` returns the address of `Outer::inner`.
        let inner: Shared<Inner> = unsafe { outer.alias(outer_to_inner) };

        assert_eq!(outer.use_count(), 2);
        assert!(inner.same_owner(&outer));
        assert_eq!(inner.value, 7);
        assert_eq!(outer.tag, 1);

        drop(outer);
        assert_eq!(inner.use_count(), 1);
        assert_eq!(inner.value, 7);
    }

    #[test]
    fn unique_deref_mut() {
        let mut value = Unique::new(Tracked(1));
        value.0 = 8;
        assert_eq!(value.0, 8);
    }
}
