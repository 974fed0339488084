//! Host overrides of native virtual methods.
//!
//! A native type that host classes may extend embeds a [`HostAnchor`] and
//! implements [`Wrapper`]. Its "virtual" methods call [`overload`] (or
//! [`overload_pure`]) first: if the host object behind `self` overrides the
//! method, the override runs; otherwise the native default does.
//!
//! The anchor doubles as the keep-alive slot used when the value is released
//! into native ownership: it then holds the value's own host object, so the
//! host-side state survives for as long as native code owns the value.

use std::cell::RefCell;
use std::fmt;

use parking_lot::Mutex;

use hostbind_core::{BindError, BindResult, HostObject, NativePtr, NativeType};

use crate::caster::find_wrapper;
use crate::convert::{FromHost, HostArgs};
use crate::internals::get_internals;
use crate::life_support::current_scope;

/// Slot in a native value that can hold the value's own host object.
#[derive(Default)]
pub struct HostAnchor {
    parked: Mutex<Option<HostObject>>,
}

impl HostAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `obj` alive from inside the native value.
    pub fn park(&self, obj: HostObject) {
        let previous = self.parked.lock().replace(obj);
        drop(previous);
    }

    /// Let go of the parked object, returning it.
    pub fn take(&self) -> Option<HostObject> {
        self.parked.lock().take()
    }

    /// The parked object, if any.
    pub fn get(&self) -> Option<HostObject> {
        self.parked.lock().clone()
    }

    pub fn is_parked(&self) -> bool {
        self.parked.lock().is_some()
    }
}

impl fmt::Debug for HostAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAnchor")
            .field("parked", &self.is_parked())
            .finish()
    }
}

/// A native type host classes can derive from and override.
pub trait Wrapper: NativeType {
    fn anchor(&self) -> &HostAnchor;
}

/// Anchor accessor installed in the descriptor of a `Wrapper` type.
///
/// # Safety
///
/// `ptr` must address a live `T`.
pub(crate) unsafe fn anchor_of<T: Wrapper>(ptr: NativePtr) -> *const HostAnchor {
    // SAFETY: forwarded to the caller.
    let value = unsafe { ptr.as_ref::<T>() };
    value.anchor() as *const HostAnchor
}

thread_local! {
    /// (object id, method) pairs whose override is running on this thread.
    static ACTIVE: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

struct ActiveOverride {
    id: usize,
    name: String,
}

impl ActiveOverride {
    fn enter(id: usize, name: &str) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push((id, name.to_string())));
        ActiveOverride {
            id,
            name: name.to_string(),
        }
    }

    fn is_active(id: usize, name: &str) -> bool {
        ACTIVE.with(|active| active.borrow().iter().any(|(i, n)| *i == id && n == name))
    }
}

impl Drop for ActiveOverride {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|(i, n)| *i == self.id && *n == self.name) {
                active.remove(pos);
            }
        });
    }
}

/// The host object behind `this`: parked in its anchor, or found through the
/// instance index.
fn host_self<T: Wrapper>(this: &T) -> BindResult<Option<HostObject>> {
    if let Some(parked) = this.anchor().get() {
        return Ok(Some(parked));
    }
    let Some(descriptor) = get_internals()?.lookup(T::type_hash(), current_scope()) else {
        return Ok(None);
    };
    find_wrapper(NativePtr::from_ref(this), &descriptor)
}

/// The host override of `name` on the object behind `this`, bound to it.
///
/// Returns `None` when there is no host object, when the method resolves to
/// a native definition, or when the override is already running for this
/// object (so an override calling the native default does not recurse).
pub fn get_override<T: Wrapper>(this: &T, name: &str) -> BindResult<Option<HostObject>> {
    let Some(obj) = host_self(this)? else {
        return Ok(None);
    };
    if ActiveOverride::is_active(obj.id(), name) {
        return Ok(None);
    }
    let Some((_, owner)) = obj.type_().lookup_with_owner(name) else {
        return Ok(None);
    };
    if owner.is_native() {
        return Ok(None);
    }
    Ok(Some(obj))
}

/// Dispatch `name` to a host override if one exists, else run `default`.
pub fn overload<T, A, R>(this: &T, name: &str, args: A, default: impl FnOnce(&T) -> R) -> BindResult<R>
where
    T: Wrapper,
    A: HostArgs,
    R: FromHost,
{
    match call_override(this, name, args)? {
        Some(result) => Ok(result),
        None => Ok(default(this)),
    }
}

/// Dispatch `name` to a host override, failing when there is none.
pub fn overload_pure<T, A, R>(this: &T, name: &str, args: A) -> BindResult<R>
where
    T: Wrapper,
    A: HostArgs,
    R: FromHost,
{
    call_override(this, name, args)?.ok_or_else(|| BindError::PureVirtualNotOverridden {
        type_name: T::clean_name(),
        method: name.to_string(),
    })
}

fn call_override<T, A, R>(this: &T, name: &str, args: A) -> BindResult<Option<R>>
where
    T: Wrapper,
    A: HostArgs,
    R: FromHost,
{
    let Some(obj) = get_override(this, name)? else {
        return Ok(None);
    };
    let args = args.into_host_args()?;
    let _active = ActiveOverride::enter(obj.id(), name);
    let result = obj.call_method(name, &args)?;
    R::from_host(&result, true).map(Some)
}
