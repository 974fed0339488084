//! Native-side type identity and type-erased value handling.
//!
//! The binding layer never knows the concrete Rust type behind a wrapper at
//! compile time. It moves values around as [`NativePtr`] addresses and manages
//! them through a small [`NativeVTable`] of monomorphized function pointers
//! (drop, copy, move) captured once at registration time.
//!
//! # Example
//!
//! ```
//! use hostbind_core::{NativePtr, NativeType, NativeVTable, TypeHash};
//!
//! #[derive(Clone, Default)]
//! struct Meters(f64);
//!
//! impl NativeType for Meters {}
//!
//! let vtable = NativeVTable::of::<Meters>().copyable::<Meters>();
//! let ptr = NativePtr::from_box(Box::new(Meters(3.0)));
//! let copy = unsafe { (vtable.copy.unwrap())(ptr) };
//! assert_ne!(ptr, copy);
//! unsafe {
//!     (vtable.drop)(ptr);
//!     (vtable.drop)(copy);
//! }
//! assert_eq!(Meters::type_hash(), TypeHash::of::<Meters>());
//! ```

use std::fmt;
use std::ptr::NonNull;

use crate::TypeHash;
use crate::type_hash::clean_type_name;

/// Trait for native types that can be registered with the binding layer.
///
/// The defaults derive the identity from the Rust type name, which is stable
/// across modules that link the same type. Override `type_name` only to give a
/// type a shorter user-facing name; the hash must stay consistent with it.
pub trait NativeType: Send + Sync + 'static {
    /// Get the native identity of this type.
    fn type_hash() -> TypeHash {
        TypeHash::from_name(Self::type_name())
    }

    /// Get the fully qualified native type name.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Get the cleaned name used in messages.
    fn clean_name() -> String {
        clean_type_name(Self::type_name())
    }
}

/// Address of a native value.
///
/// A `NativePtr` carries no ownership. Who frees the value is decided by the
/// return policy of the cast that handed it across the boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NativePtr(NonNull<u8>);

// SAFETY: a NativePtr is an address; dereferencing it is always unsafe and
// registered types are required to be Send + Sync.
unsafe impl Send for NativePtr {}
unsafe impl Sync for NativePtr {}

impl NativePtr {
    /// Address of a borrowed value.
    #[inline]
    pub fn from_ref<T>(value: &T) -> Self {
        NativePtr(NonNull::from(value).cast())
    }

    /// Address of a mutably borrowed value.
    #[inline]
    pub fn from_mut<T>(value: &mut T) -> Self {
        NativePtr(NonNull::from(value).cast())
    }

    /// Leak a box; whoever receives the pointer must eventually free it with
    /// the matching [`NativeVTable::drop`].
    #[inline]
    pub fn from_box<T>(value: Box<T>) -> Self {
        NativePtr(NonNull::from(Box::leak(value)).cast())
    }

    /// Wrap a raw pointer, returning `None` for null.
    #[inline]
    pub fn from_raw<T>(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr.cast()).map(NativePtr)
    }

    /// Numeric address.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Reinterpret as a typed raw pointer.
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0.as_ptr().cast()
    }

    /// Shift the address by `bytes`, as a base-subobject conversion does.
    #[inline]
    pub fn byte_offset(self, bytes: isize) -> Self {
        // SAFETY: callers pass the offset of a field or base inside the
        // pointee, which stays within its allocation and cannot wrap to null.
        unsafe { NativePtr(NonNull::new_unchecked(self.0.as_ptr().wrapping_offset(bytes))) }
    }

    /// Borrow the value.
    ///
    /// # Safety
    ///
    /// The pointer must address a live `T` for the lifetime `'a`.
    #[inline]
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        unsafe { &*self.as_ptr::<T>() }
    }

    /// Mutably borrow the value.
    ///
    /// # Safety
    ///
    /// The pointer must address a live `T` with no other borrows for `'a`.
    #[inline]
    pub unsafe fn as_mut<'a, T>(self) -> &'a mut T {
        unsafe { &mut *self.as_ptr::<T>() }
    }

    /// Reclaim a box leaked by [`NativePtr::from_box`].
    ///
    /// # Safety
    ///
    /// The pointer must come from `from_box::<T>` and not have been freed.
    #[inline]
    pub unsafe fn into_box<T>(self) -> Box<T> {
        unsafe { Box::from_raw(self.as_ptr::<T>()) }
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.addr())
    }
}

/// Frees a boxed native value.
pub type DropFn = unsafe fn(NativePtr);

/// Produces a new boxed native value from an existing one.
pub type CtorFn = unsafe fn(NativePtr) -> NativePtr;

/// Converts a derived address into one of its base-subobject addresses.
pub type UpcastFn = fn(NativePtr) -> NativePtr;

/// Reports the most-derived identity and address of a value reached through
/// a base pointer, if it knows one.
pub type RuntimeTypeFn = unsafe fn(NativePtr) -> Option<(TypeHash, NativePtr)>;

/// Type-erased operations on a registered native type.
#[derive(Clone, Copy)]
pub struct NativeVTable {
    /// `size_of::<T>()`
    pub size: usize,
    /// `align_of::<T>()`
    pub align: usize,
    /// Frees a value allocated with `NativePtr::from_box::<T>`.
    pub drop: DropFn,
    /// Clones into a new box; `None` if not copyable.
    pub copy: Option<CtorFn>,
    /// Moves into a new box, leaving the source defaulted; `None` if not movable.
    pub move_: Option<CtorFn>,
}

impl NativeVTable {
    /// A vtable with only size information and a destructor.
    pub fn of<T: NativeType>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            drop: drop_boxed::<T>,
            copy: None,
            move_: None,
        }
    }

    /// Add a copy constructor. `T` must be the vtable's own type.
    pub fn copyable<T: NativeType + Clone>(mut self) -> Self {
        self.copy = Some(copy_boxed::<T>);
        self
    }

    /// Add a move constructor. `T` must be the vtable's own type.
    pub fn movable<T: NativeType + Default>(mut self) -> Self {
        self.move_ = Some(move_boxed::<T>);
        self
    }
}

impl fmt::Debug for NativeVTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeVTable")
            .field("size", &self.size)
            .field("align", &self.align)
            .field("copyable", &self.copy.is_some())
            .field("movable", &self.move_.is_some())
            .finish()
    }
}

/// # Safety
///
/// `ptr` must come from `NativePtr::from_box::<T>` and be freed only once.
pub unsafe fn drop_boxed<T>(ptr: NativePtr) {
    drop(unsafe { ptr.into_box::<T>() });
}

/// # Safety
///
/// `ptr` must address a live `T`.
pub unsafe fn copy_boxed<T: Clone>(ptr: NativePtr) -> NativePtr {
    let value = unsafe { ptr.as_ref::<T>() }.clone();
    NativePtr::from_box(Box::new(value))
}

/// # Safety
///
/// `ptr` must address a live `T` with no outstanding borrows.
pub unsafe fn move_boxed<T: Default>(ptr: NativePtr) -> NativePtr {
    let value = std::mem::take(unsafe { ptr.as_mut::<T>() });
    NativePtr::from_box(Box::new(value))
}
