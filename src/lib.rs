//! Binding core between native Rust types and a dynamic host runtime.
//!
//! Native types are registered through a [`Module`] and its
//! [`ClassBuilder`]; each registration produces a [`TypeDescriptor`] and a
//! host type whose instances carry native values in typed slots. Values
//! cross the boundary in two directions:
//!
//! - host → native: [`Loader`] implementations ([`TypeCaster`],
//!   [`SharedHolderCaster`], [`UniqueHolderCaster`]) and the [`FromHost`]
//!   conversions built on them
//! - native → host: [`cast`] and the [`IntoHost`] conversions, governed by a
//!   [`ReturnPolicy`]
//!
//! Temporaries created while converting arguments live in the current
//! [`LifeSupport`] frame; [`keep_alive`] ties objects together beyond a call.
//!
//! # Example
//!
//! ```ignore
//! use hostbind::prelude::*;
//!
//! struct Counter { count: i64 }
//! impl NativeType for Counter {}
//!
//! let mut module = Module::new("counters")?;
//! module
//!     .class::<Counter>("Counter")
//!     .init(1, |ctx| Ok(Counter { count: ctx.arg(0)? }))
//!     .def("get", 0, |ctx| ctx.this::<Counter>()?.count.into_host())
//!     .build()?;
//!
//! let counter = module.host_type("Counter").unwrap().call(&[HostObject::int(3)])?;
//! assert_eq!(counter.call_method("get", &[])?.as_int(), Some(3));
//! ```
//!
//! # Features
//!
//! - `profiling`: instrument the load and cast paths with the `profiling`
//!   crate.

mod call_context;
mod caster;
mod class_builder;
mod convert;
mod descriptor;
mod holder;
mod holder_caster;
mod instance;
mod internals;
mod life_support;
mod module;
mod policy;
mod resolve;
mod trampoline;

pub use hostbind_core::{
    BindError, BindResult, ErrorCategory, ErrorKind, HostObject, HostType, HostTypeId, HostWeak, NativePtr,
    NativeType, NativeVTable, RuntimeTypeFn, TypeFlags, TypeHash, UpcastFn, builtins, clean_type_name,
};
pub use hostbind_registry::{InstanceKey, ModuleId, Scope};

pub use call_context::{CallContext, NativeFunction, OverloadFn};
pub use caster::{
    LOCAL_LOADER_ATTR, LocalLoader, Loader, TypeCaster, cast, cast_boxed, cast_ref, cast_value, descriptor_of,
    find_wrapper, load_impl, load_ref, take,
};
pub use class_builder::ClassBuilder;
pub use convert::{FromHost, HostArgs, IntoHost, make_tuple};
pub use descriptor::{
    AnchorFn, BaseLink, DescriptorParts, DirectConversion, ImplicitConversion, ReclaimFn, ReleaseFn, ReleaseInfo,
    TypeDescriptor,
};
pub use holder::{Holder, HolderState, NativeBox, Shared, Unique};
pub use holder_caster::{Loaded, MOVE_CONTAINER_ATTR, SharedHolderCaster, UniqueHolderCaster, load_held};
pub use instance::{INLINE_HOLDER_BUDGET, Instance, InstanceLayout, Slot, SlotStatus, ValueAndHolder};
pub use internals::{Internals, get_internals, get_shared_data, set_shared_data};
pub use life_support::{LifeSupport, add_patient, current_scope, frame_depth, keep_alive, patient_count};
pub use module::Module;
pub use policy::{CasterKind, HolderKind, ReturnPolicy};
pub use resolve::{LoadType, all_type_info, determine_load_type, get_type_info};
pub use trampoline::{HostAnchor, Wrapper, get_override, overload, overload_pure};

/// Everything needed to register types and write bound functions.
pub mod prelude {
    pub use crate::{
        BindError, BindResult, CallContext, ClassBuilder, FromHost, HolderKind, HostAnchor, HostObject, HostType,
        IntoHost, Module, NativePtr, NativeType, ReturnPolicy, Shared, Unique, Wrapper, cast_ref, cast_value,
        keep_alive, load_ref, overload, overload_pure,
    };
}
