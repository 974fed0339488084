//! A minimal model of the dynamic host runtime.
//!
//! The binding layer talks to the host through reference-counted objects,
//! type objects with ordered bases, attribute dictionaries and callables.
//! This module provides exactly those pieces and nothing more; there is no
//! garbage collector and no interpreter loop.

mod object;
mod types;

pub use object::{HostFn, HostObject, HostWeak, NativeData, Payload};
pub use types::{AllocFn, HostType, HostTypeBuilder, HostTypeId, TypeFlags, builtins};
