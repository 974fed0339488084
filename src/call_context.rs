//! Bound native functions and their argument context.
//!
//! A [`NativeFunction`] is a host-callable set of overloads. Calling it opens
//! one [`LifeSupport`] frame and tries every overload twice: first without
//! implicit conversions, then with them. An overload that fails with a type
//! mismatch passes to the next one; any other failure is returned as is.
//!
//! Overloads read their arguments through [`CallContext`].

use std::fmt;
use std::sync::Arc;

use hostbind_core::{BindError, BindResult, HostObject, NativeType};
use hostbind_registry::Scope;

use crate::caster::{Loader, TypeCaster};
use crate::convert::FromHost;
use crate::life_support::LifeSupport;

/// Context for one overload attempt.
///
/// ## Typed argument access
///
/// ```ignore
/// let count: i32 = ctx.arg(0)?;
/// let pet: &Pet = ctx.arg_ref(1)?;
/// ```
pub struct CallContext<'a> {
    /// Host arguments; for methods, slot 0 is `self`.
    args: &'a [HostObject],
    /// Index of the first argument (0 for functions, 1 for methods).
    arg_offset: usize,
    convert: bool,
    /// Argument indices that never convert.
    noconvert: &'a [usize],
    scope: Scope,
}

impl<'a> CallContext<'a> {
    pub fn new(args: &'a [HostObject], arg_offset: usize, convert: bool, scope: Scope) -> Self {
        CallContext {
            args,
            arg_offset,
            convert,
            noconvert: &[],
            scope,
        }
    }

    /// Disable conversion for the given argument indices.
    pub fn with_noconvert(mut self, indices: &'a [usize]) -> Self {
        self.noconvert = indices;
        self
    }

    /// Number of arguments, excluding `self` for methods.
    pub fn arg_count(&self) -> usize {
        self.args.len().saturating_sub(self.arg_offset)
    }

    /// Whether argument `index` may be converted in this pass.
    pub fn convert(&self, index: usize) -> bool {
        self.convert && !self.noconvert.contains(&index)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// The raw host argument.
    pub fn arg_obj(&self, index: usize) -> BindResult<&'a HostObject> {
        self.args
            .get(self.arg_offset + index)
            .ok_or(BindError::ArgumentIndexOutOfBounds {
                index,
                count: self.arg_count(),
            })
    }

    /// A typed argument value.
    pub fn arg<T: FromHost>(&self, index: usize) -> BindResult<T> {
        T::from_host(self.arg_obj(index)?, self.convert(index))
    }

    /// Borrow a registered native value; none is rejected.
    pub fn arg_ref<T: NativeType>(&self, index: usize) -> BindResult<&'a T> {
        let src = self.arg_obj(index)?;
        self.arg_ptr::<T>(index)?.ok_or_else(|| {
            if src.is_none() {
                BindError::ReferenceCast {
                    type_name: T::clean_name(),
                }
            } else {
                BindError::mismatch(T::clean_name(), src.type_name())
            }
        })
    }

    /// Borrow a registered native value; none loads as `None` in convert
    /// mode.
    pub fn arg_ptr<T: NativeType>(&self, index: usize) -> BindResult<Option<&'a T>> {
        let src = self.arg_obj(index)?;
        load_native::<T>(src, self.convert(index), self.scope)
    }

    /// The receiver of a method call.
    pub fn this_obj(&self) -> BindResult<&'a HostObject> {
        if self.arg_offset == 0 {
            return Err(BindError::Raised(String::from("function has no receiver")));
        }
        self.args.first().ok_or(BindError::ArgumentIndexOutOfBounds { index: 0, count: 0 })
    }

    /// Borrow the receiver as `T`. The receiver never converts.
    pub fn this<T: NativeType>(&self) -> BindResult<&'a T> {
        let obj = self.this_obj()?;
        load_native::<T>(obj, false, self.scope)?.ok_or_else(|| BindError::mismatch(T::clean_name(), obj.type_name()))
    }

    /// Mutably borrow the receiver as `T`.
    ///
    /// # Safety
    ///
    /// The value is shared with the host. While the returned reference is
    /// alive the caller must not call `this_mut` or `this` again, must not
    /// borrow the same object through an argument, and must not call back
    /// into host code that can reach the receiver.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn this_mut<T: NativeType>(&self) -> BindResult<&'a mut T> {
        let obj = self.this_obj()?;
        let mut caster = TypeCaster::of::<T>(self.scope)?;
        if !caster.load(obj, false)? {
            return Err(BindError::mismatch(T::clean_name(), obj.type_name()));
        }
        let ptr = caster.value().ok_or_else(|| BindError::ReferenceCast {
            type_name: T::clean_name(),
        })?;
        // SAFETY: the value lives in the receiver for the whole call; the
        // caller upholds exclusivity.
        Ok(unsafe { ptr.as_mut::<T>() })
    }
}

fn load_native<'a, T: NativeType>(src: &'a HostObject, convert: bool, scope: Scope) -> BindResult<Option<&'a T>> {
    let mut caster = TypeCaster::of::<T>(scope)?;
    if !caster.load(src, convert)? {
        return Err(BindError::mismatch(caster.type_name(), src.type_name()));
    }
    // SAFETY: the value lives in `src`, or in a patient of the current call
    // frame, for as long as the call runs.
    Ok(caster.value().map(|ptr| unsafe { ptr.as_ref::<T>() }))
}

// ============================================================================
// NativeFunction
// ============================================================================

/// One overload body.
pub type OverloadFn = Arc<dyn Fn(&CallContext<'_>) -> BindResult<HostObject> + Send + Sync>;

#[derive(Clone)]
struct Overload {
    call: OverloadFn,
    arity: usize,
    noconvert: Vec<usize>,
}

/// A host-callable native function with overloads.
#[derive(Clone)]
pub struct NativeFunction {
    name: String,
    is_method: bool,
    scope: Scope,
    overloads: Vec<Overload>,
}

impl NativeFunction {
    /// A free function.
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        NativeFunction {
            name: name.into(),
            is_method: false,
            scope,
            overloads: Vec::new(),
        }
    }

    /// A method; the receiver is passed as the first host argument.
    pub fn method(name: impl Into<String>, scope: Scope) -> Self {
        NativeFunction {
            is_method: true,
            ..Self::new(name, scope)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overload_count(&self) -> usize {
        self.overloads.len()
    }

    /// Add an overload taking `arity` arguments (excluding the receiver).
    pub fn overload<F>(mut self, arity: usize, f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> BindResult<HostObject> + Send + Sync + 'static,
    {
        self.push(arity, Vec::new(), Arc::new(f));
        self
    }

    /// Add an overload whose listed arguments never convert.
    pub fn overload_noconvert<F>(mut self, arity: usize, noconvert: &[usize], f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> BindResult<HostObject> + Send + Sync + 'static,
    {
        self.push(arity, noconvert.to_vec(), Arc::new(f));
        self
    }

    pub(crate) fn push(&mut self, arity: usize, noconvert: Vec<usize>, call: OverloadFn) {
        self.overloads.push(Overload { call, arity, noconvert });
    }

    /// Dispatch a call.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, args: &[HostObject]) -> BindResult<HostObject> {
        let _frame = LifeSupport::enter(self.scope);
        let offset = usize::from(self.is_method);
        let given = args.len().saturating_sub(offset);
        if self.is_method && args.is_empty() {
            return Err(BindError::NoMatchingOverload {
                function: self.name.clone(),
            });
        }

        for convert in [false, true] {
            for overload in self.overloads.iter().filter(|o| o.arity == given) {
                let ctx = CallContext::new(args, offset, convert, self.scope).with_noconvert(&overload.noconvert);
                match (overload.call)(&ctx) {
                    Ok(result) => return Ok(result),
                    Err(err) if err.is_mismatch() => {
                        log::trace!("{}: overload skipped ({err})", self.name);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Err(BindError::NoMatchingOverload {
            function: self.name.clone(),
        })
    }

    /// Wrap as a host function object.
    pub fn into_host(self) -> HostObject {
        let function = Arc::new(self);
        HostObject::function(move |args| function.call(args))
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("is_method", &self.is_method)
            .field("overloads", &self.overloads.len())
            .finish()
    }
}
