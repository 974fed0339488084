//! Process-wide tables of the binding layer.
//!
//! - [`TypeRegistry`]: native identity -> descriptor, per visibility scope
//! - [`InstanceIndex`]: native address -> live wrappers
//! - [`ResolutionCache`]: host type -> ordered registered roots
//! - [`SharedData`]: string-keyed state shared across modules
//!
//! None of these types synchronize internally; the owner of the process-wide
//! state decides how each one is guarded.

mod cache;
mod instance_index;
mod registry;
mod shared_data;

pub use cache::ResolutionCache;
pub use instance_index::{InstanceIndex, InstanceKey};
pub use registry::{ModuleId, Scope, TypeRegistry};
pub use shared_data::SharedData;
