//! Core types shared by every hostbind crate.
//!
//! - [`TypeHash`]: deterministic native type identity
//! - [`BindError`] / [`ErrorKind`]: the unified error type
//! - [`NativePtr`] / [`NativeVTable`]: type-erased native values
//! - [`host`]: the host runtime object model

mod error;
pub mod host;
mod native;
mod type_hash;

pub use error::{BindError, BindResult, ErrorCategory, ErrorKind, host_detail};
pub use host::{
    AllocFn, HostFn, HostObject, HostType, HostTypeBuilder, HostTypeId, HostWeak, NativeData, Payload,
    TypeFlags, builtins,
};
pub use native::{
    CtorFn, DropFn, NativePtr, NativeType, NativeVTable, RuntimeTypeFn, UpcastFn, copy_boxed,
    drop_boxed, move_boxed,
};
pub use type_hash::{TypeHash, clean_type_name, hash_constants};
