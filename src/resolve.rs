//! Type resolution.
//!
//! Finds the registered native roots of a host type and classifies how a
//! host value relates to a requested native type.
//!
//! Roots are found with a breadth-first walk over declared bases: a
//! registered base contributes its descriptor (first occurrence wins), an
//! unregistered base is walked through. The result is cached per host type
//! and never recomputed, so slot order is stable for every instance of a
//! type.

use std::sync::Arc;

use hostbind_core::{BindError, BindResult, HostObject, HostType, host_detail};

use crate::descriptor::TypeDescriptor;
use crate::instance::Instance;
use crate::internals::{Internals, get_internals};

/// How a host value relates to a requested native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadType {
    /// The value's type is the registered type itself.
    ExactNative,
    /// A host subclass with exactly one root, and the requested type is
    /// reachable from it by reinterpretation.
    DerivedSingleRoot,
    /// A host subclass with several roots; `slot` is the first root deriving
    /// from the requested type.
    DerivedMultiRootMatch { slot: usize },
    /// A host subclass whose roots need an implicit cast to reach the
    /// requested type.
    DerivedMultiRootNoMatch,
    /// The value is not an instance of the requested type at all.
    ConversionNeeded,
}

impl LoadType {
    /// Slot to read when the value can be loaded directly.
    pub fn slot(self) -> Option<usize> {
        match self {
            LoadType::ExactNative | LoadType::DerivedSingleRoot => Some(0),
            LoadType::DerivedMultiRootMatch { slot } => Some(slot),
            LoadType::DerivedMultiRootNoMatch | LoadType::ConversionNeeded => None,
        }
    }
}

/// Registered native roots of `host_type`, in resolution order.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn all_type_info(host_type: &HostType) -> BindResult<Arc<[Arc<TypeDescriptor>]>> {
    let internals = get_internals()?;
    if let Some(roots) = internals.cache().get(host_type.id()) {
        return Ok(roots);
    }

    let roots = match internals.descriptor_for(host_type) {
        Some(descriptor) => vec![descriptor],
        None => populate(internals, host_type),
    };
    log::trace!("resolved {} native roots for {:?}", roots.len(), host_type);
    Ok(internals.cache_mut().insert(host_type.id(), roots))
}

fn populate(internals: &Internals, host_type: &HostType) -> Vec<Arc<TypeDescriptor>> {
    let mut roots: Vec<Arc<TypeDescriptor>> = Vec::new();
    let mut push = |descriptor: &Arc<TypeDescriptor>| {
        if !roots.iter().any(|known| Arc::ptr_eq(known, descriptor)) {
            roots.push(Arc::clone(descriptor));
        }
    };

    let mut pending: Vec<HostType> = host_type.bases().to_vec();
    let mut next = 0;
    while let Some(base) = pending.get(next).cloned() {
        next += 1;
        if let Some(descriptor) = internals.descriptor_for(&base) {
            push(&descriptor);
        } else if let Some(cached) = internals.cache().get(base.id()) {
            cached.iter().for_each(&mut push);
        } else {
            pending.extend(base.bases().iter().cloned());
        }
    }
    roots
}

/// The single registered root of `host_type`.
///
/// Fails with `AmbiguousBases` when there is more than one.
pub fn get_type_info(host_type: &HostType) -> BindResult<Option<Arc<TypeDescriptor>>> {
    let roots = all_type_info(host_type)?;
    match roots.len() {
        0 => Ok(None),
        1 => Ok(Some(Arc::clone(&roots[0]))),
        _ => Err(BindError::AmbiguousBases {
            host_type: host_detail(host_type.name()),
        }),
    }
}

/// Classify `src` against `target`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn determine_load_type(src: &HostObject, target: &TypeDescriptor) -> BindResult<LoadType> {
    let src_type = src.type_();
    let load_type = if src_type == target.host_type() {
        LoadType::ExactNative
    } else if Instance::of(src).is_none() || !src_type.is_subtype_of(target.host_type()) {
        LoadType::ConversionNeeded
    } else {
        let roots = all_type_info(src_type)?;
        if roots.len() == 1 && (target.is_simple_type() || roots[0].id() == target.id()) {
            LoadType::DerivedSingleRoot
        } else {
            // A simple target sits at offset 0 inside any root deriving from it.
            let compatible = |root: &Arc<TypeDescriptor>| {
                root.id() == target.id() || (target.is_simple_type() && root.derives_from(target.id()))
            };
            match roots.iter().position(compatible) {
                Some(slot) => LoadType::DerivedMultiRootMatch { slot },
                None => LoadType::DerivedMultiRootNoMatch,
            }
        }
    };
    log::trace!("{:?} loads as {} via {:?}", src_type, target.name(), load_type);
    Ok(load_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_per_load_type() {
        assert_eq!(LoadType::ExactNative.slot(), Some(0));
        assert_eq!(LoadType::DerivedSingleRoot.slot(), Some(0));
        assert_eq!(LoadType::DerivedMultiRootMatch { slot: 2 }.slot(), Some(2));
        assert_eq!(LoadType::DerivedMultiRootNoMatch.slot(), None);
        assert_eq!(LoadType::ConversionNeeded.slot(), None);
    }

    #[test]
    fn host_only_type_has_no_roots() {
        let plain = HostType::new_class("resolve::tests::Plain", &[]).unwrap();
        let child = HostType::new_class("resolve::tests::Child", &[plain]).unwrap();
        assert!(all_type_info(&child).unwrap().is_empty());
        assert!(get_type_info(&child).unwrap().is_none());
    }
}
