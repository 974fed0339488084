//! Conversion traits for builtin values and held native types.
//!
//! - [`FromHost`]: load a Rust value from a host object
//! - [`IntoHost`]: turn a Rust value into a host object
//!
//! Loading reports three outcomes: `Ok(Some(value))`, `Ok(None)` when the
//! source is simply not convertible (the caller moves on to the next
//! overload), and `Err` for failures that should surface, such as an integer
//! out of range.
//!
//! ## Conversion rules
//!
//! - Integers: only host ints; narrowing is range-checked, floats are never
//!   truncated.
//! - Floats: host floats, and host ints in convert mode.
//! - `bool`: host bools, and none (as `false`) in convert mode.
//! - `String`: host strings.
//! - `Vec<T>`: lists and tuples, element by element.
//! - Tuples: host tuples or lists of the same length.
//! - `Option<T>`: none is `None`.
//! - `HostObject`: passed through unchanged.
//! - `Shared<T>` / `Unique<T>`: through the holder casters.

use hostbind_core::{BindError, BindResult, HostObject, NativePtr, NativeType};

use crate::caster::{Loader, cast, cast_boxed, descriptor_of};
use crate::holder::{Holder, Shared, Unique};
use crate::holder_caster::{SharedHolderCaster, UniqueHolderCaster};
use crate::life_support::current_scope;
use crate::policy::{CasterKind, ReturnPolicy};

/// Load a value from a host object.
pub trait FromHost: Sized {
    /// Strategy used for this type.
    const KIND: CasterKind;

    /// Name used in mismatch errors.
    fn expected() -> String;

    /// Try to load `src`. `Ok(None)` means "not convertible".
    fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>>;

    /// Load `src`, turning "not convertible" into a `TypeMismatch`.
    fn from_host(src: &HostObject, convert: bool) -> BindResult<Self> {
        Self::load(src, convert)?.ok_or_else(|| BindError::mismatch(Self::expected(), src.type_name()))
    }
}

/// Convert a value into a host object.
pub trait IntoHost {
    fn into_host(self) -> BindResult<HostObject>;
}

// ============================================================================
// Integer implementations
// ============================================================================

macro_rules! impl_host_int {
    ($($ty:ty),*) => {
        $(
            impl FromHost for $ty {
                const KIND: CasterKind = CasterKind::Primitive;

                fn expected() -> String {
                    String::from("int")
                }

                fn load(src: &HostObject, _convert: bool) -> BindResult<Option<Self>> {
                    let Some(value) = src.as_int() else {
                        return Ok(None);
                    };
                    <$ty>::try_from(value)
                        .map(Some)
                        .map_err(|_| BindError::IntegerOverflow {
                            value,
                            target_type: stringify!($ty),
                        })
                }
            }

            impl IntoHost for $ty {
                fn into_host(self) -> BindResult<HostObject> {
                    i64::try_from(self)
                        .map(HostObject::int)
                        .map_err(|_| BindError::Raised(format!(
                            "{} value {} does not fit in a host int",
                            stringify!($ty),
                            self
                        )))
                }
            }
        )*
    };
}

impl_host_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// ============================================================================
// Float implementations
// ============================================================================

macro_rules! impl_host_float {
    ($($ty:ty),*) => {
        $(
            impl FromHost for $ty {
                const KIND: CasterKind = CasterKind::Primitive;

                fn expected() -> String {
                    String::from("float")
                }

                fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
                    if let Some(value) = src.as_float() {
                        return Ok(Some(value as $ty));
                    }
                    match src.as_int() {
                        Some(value) if convert => Ok(Some(value as $ty)),
                        _ => Ok(None),
                    }
                }
            }

            impl IntoHost for $ty {
                fn into_host(self) -> BindResult<HostObject> {
                    Ok(HostObject::float(self as f64))
                }
            }
        )*
    };
}

impl_host_float!(f32, f64);

// ============================================================================
// Bool, strings, unit
// ============================================================================

impl FromHost for bool {
    const KIND: CasterKind = CasterKind::Primitive;

    fn expected() -> String {
        String::from("bool")
    }

    fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
        if let Some(value) = src.as_bool() {
            return Ok(Some(value));
        }
        Ok((convert && src.is_none()).then_some(false))
    }
}

impl IntoHost for bool {
    fn into_host(self) -> BindResult<HostObject> {
        Ok(HostObject::bool(self))
    }
}

impl FromHost for String {
    const KIND: CasterKind = CasterKind::String;

    fn expected() -> String {
        String::from("str")
    }

    fn load(src: &HostObject, _convert: bool) -> BindResult<Option<Self>> {
        Ok(src.as_str().map(str::to_string))
    }
}

impl IntoHost for String {
    fn into_host(self) -> BindResult<HostObject> {
        Ok(HostObject::str(self))
    }
}

impl IntoHost for &str {
    fn into_host(self) -> BindResult<HostObject> {
        Ok(HostObject::str(self))
    }
}

impl FromHost for () {
    const KIND: CasterKind = CasterKind::Primitive;

    fn expected() -> String {
        String::from("None")
    }

    fn load(src: &HostObject, _convert: bool) -> BindResult<Option<Self>> {
        Ok(src.is_none().then_some(()))
    }
}

impl IntoHost for () {
    fn into_host(self) -> BindResult<HostObject> {
        Ok(HostObject::none())
    }
}

// ============================================================================
// Pass-through, optional, sequences
// ============================================================================

impl FromHost for HostObject {
    const KIND: CasterKind = CasterKind::PassThrough;

    fn expected() -> String {
        String::from("object")
    }

    fn load(src: &HostObject, _convert: bool) -> BindResult<Option<Self>> {
        Ok(Some(src.clone()))
    }
}

impl IntoHost for HostObject {
    fn into_host(self) -> BindResult<HostObject> {
        Ok(self)
    }
}

impl<T: FromHost> FromHost for Option<T> {
    const KIND: CasterKind = T::KIND;

    fn expected() -> String {
        format!("Optional[{}]", T::expected())
    }

    fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
        if src.is_none() {
            return Ok(Some(None));
        }
        Ok(T::load(src, convert)?.map(Some))
    }
}

impl<T: IntoHost> IntoHost for Option<T> {
    fn into_host(self) -> BindResult<HostObject> {
        match self {
            Some(value) => value.into_host(),
            None => Ok(HostObject::none()),
        }
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    const KIND: CasterKind = CasterKind::Sequence;

    fn expected() -> String {
        format!("List[{}]", T::expected())
    }

    fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
        let Some(items) = src.items() else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(items.len());
        for item in &items {
            match T::load(item, convert)? {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }
}

impl<T: IntoHost> IntoHost for Vec<T> {
    fn into_host(self) -> BindResult<HostObject> {
        let items = self
            .into_iter()
            .map(IntoHost::into_host)
            .collect::<BindResult<Vec<_>>>()?;
        Ok(HostObject::list(items))
    }
}

macro_rules! impl_host_tuple {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: FromHost),+> FromHost for ($($name,)+) {
            const KIND: CasterKind = CasterKind::Sequence;

            fn expected() -> String {
                let parts: Vec<String> = vec![$($name::expected()),+];
                format!("Tuple[{}]", parts.join(", "))
            }

            fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
                let Some(items) = src.items() else {
                    return Ok(None);
                };
                if items.len() != $len {
                    return Ok(None);
                }
                Ok(Some(($(
                    match $name::load(&items[$idx], convert)? {
                        Some(value) => value,
                        None => return Ok(None),
                    },
                )+)))
            }
        }

        impl<$($name: IntoHost),+> IntoHost for ($($name,)+) {
            fn into_host(self) -> BindResult<HostObject> {
                Ok(HostObject::tuple(self.into_host_args()?))
            }
        }

        impl<$($name: IntoHost),+> HostArgs for ($($name,)+) {
            fn into_host_args(self) -> BindResult<Vec<HostObject>> {
                Ok(vec![$(self.$idx.into_host()?),+])
            }
        }
    };
}

impl_host_tuple!(1; A 0);
impl_host_tuple!(2; A 0, B 1);
impl_host_tuple!(3; A 0, B 1, C 2);
impl_host_tuple!(4; A 0, B 1, C 2, D 3);

/// Native argument lists, turned into positional host arguments.
pub trait HostArgs {
    fn into_host_args(self) -> BindResult<Vec<HostObject>>;
}

impl HostArgs for () {
    fn into_host_args(self) -> BindResult<Vec<HostObject>> {
        Ok(Vec::new())
    }
}

/// Build a host tuple from native values.
pub fn make_tuple(values: impl HostArgs) -> BindResult<HostObject> {
    Ok(HostObject::tuple(values.into_host_args()?))
}

// ============================================================================
// Registered types
// ============================================================================

impl<T: NativeType> IntoHost for Box<T> {
    fn into_host(self) -> BindResult<HostObject> {
        cast_boxed(self)
    }
}

impl<T: NativeType> FromHost for Shared<T> {
    const KIND: CasterKind = CasterKind::HolderCopyable;

    fn expected() -> String {
        T::clean_name()
    }

    fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
        let mut caster = SharedHolderCaster::of::<T>(current_scope())?;
        if !caster.load(src, convert)? {
            return Ok(None);
        }
        Ok(caster.into_shared())
    }
}

impl<T: NativeType> IntoHost for Shared<T> {
    fn into_host(self) -> BindResult<HostObject> {
        let descriptor = descriptor_of::<T>(current_scope())?;
        let ptr: NativePtr = self.as_native_ptr();
        let owner = self.owner().clone();
        cast(
            Some(ptr),
            &descriptor,
            ReturnPolicy::TakeOwnership,
            None,
            Holder::Shared(owner),
        )
    }
}

impl<T: NativeType> FromHost for Unique<T> {
    const KIND: CasterKind = CasterKind::HolderMoveOnly;

    fn expected() -> String {
        T::clean_name()
    }

    fn load(src: &HostObject, convert: bool) -> BindResult<Option<Self>> {
        let mut caster = UniqueHolderCaster::of::<T>(current_scope())?;
        if !caster.load(src, convert)? {
            return Ok(None);
        }
        Ok(caster.into_unique())
    }
}

impl<T: NativeType> IntoHost for Unique<T> {
    fn into_host(self) -> BindResult<HostObject> {
        let descriptor = descriptor_of::<T>(current_scope())?;
        let (owner, ptr) = self.into_parts();
        cast(
            Some(ptr),
            &descriptor,
            ReturnPolicy::TakeOwnership,
            None,
            Holder::Unique(owner),
        )
    }
}
