//! Integration tests for native base classes, host classes with several
//! native roots and polymorphic native → host resolution.

use std::mem::offset_of;
use std::sync::OnceLock;

use hostbind::{
    BindError, Holder, HostObject, HostType, Instance, IntoHost, LoadType, Module, NativePtr, NativeType,
    ReturnPolicy, Scope, TypeHash, all_type_info, cast, cast_ref, cast_value, descriptor_of, determine_load_type,
    get_type_info, load_ref,
};

// =============================================================================
// Fixtures
// =============================================================================

#[repr(C)]
#[derive(Debug, Default)]
struct Left {
    l: i64,
}

impl NativeType for Left {}

#[repr(C)]
#[derive(Debug, Default)]
struct Right {
    r: i64,
}

impl NativeType for Right {}

/// Derives from both `Left` and `Right`; `Right` sits at a non-zero offset.
#[repr(C)]
#[derive(Debug, Default)]
struct Both {
    left: Left,
    right: Right,
    own: i64,
}

impl NativeType for Both {}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Species {
    Generic,
    Dog,
}

#[repr(C)]
struct Animal {
    species: Species,
    name: String,
}

impl NativeType for Animal {}

#[repr(C)]
struct Dog {
    base: Animal,
    tricks: i64,
}

impl NativeType for Dog {}

/// # Safety
///
/// `ptr` must address a live `Animal`.
unsafe fn animal_runtime_type(ptr: NativePtr) -> Option<(TypeHash, NativePtr)> {
    // SAFETY: forwarded to the caller.
    let animal = unsafe { ptr.as_ref::<Animal>() };
    match animal.species {
        Species::Dog => Some((Dog::type_hash(), ptr)),
        Species::Generic => None,
    }
}

fn module() -> &'static Module {
    static MODULE: OnceLock<Module> = OnceLock::new();
    MODULE.get_or_init(|| {
        let mut module = Module::new("inheritance").expect("Failed to create module");
        module
            .class::<Left>("Left")
            .init(1, |ctx| Ok(Left { l: ctx.arg(0)? }))
            .def("left_value", 0, |ctx| ctx.this::<Left>()?.l.into_host())
            .build()
            .expect("Failed to register Left");
        module
            .class::<Right>("Right")
            .init(1, |ctx| Ok(Right { r: ctx.arg(0)? }))
            .def("right_value", 0, |ctx| ctx.this::<Right>()?.r.into_host())
            .build()
            .expect("Failed to register Right");
        module
            .class::<Both>("Both")
            .base::<Left>(|p| p)
            .base::<Right>(|p| p.byte_offset(offset_of!(Both, right) as isize))
            .build()
            .expect("Failed to register Both");

        module
            .class::<Animal>("Animal")
            .polymorphic(animal_runtime_type)
            .def("name", 0, |ctx| ctx.this::<Animal>()?.name.clone().into_host())
            .build()
            .expect("Failed to register Animal");
        module
            .class::<Dog>("Dog")
            .base::<Animal>(|p| p)
            .init(2, |ctx| {
                Ok(Dog {
                    base: Animal {
                        species: Species::Dog,
                        name: ctx.arg(0)?,
                    },
                    tricks: ctx.arg(1)?,
                })
            })
            .def("tricks", 0, |ctx| ctx.this::<Dog>()?.tricks.into_host())
            .build()
            .expect("Failed to register Dog");
        module
    })
}

fn both() -> Both {
    Both {
        left: Left { l: 1 },
        right: Right { r: 2 },
        own: 3,
    }
}

// =============================================================================
// Multiple native bases
// =============================================================================

#[test]
fn test_multiple_bases_are_not_simple() {
    module();
    let both = descriptor_of::<Both>(Scope::Global).unwrap();
    let right = descriptor_of::<Right>(Scope::Global).unwrap();
    assert!(!both.is_simple_type());
    assert!(!right.is_simple_type());
    assert_eq!(both.bases().len(), 2);
    assert_eq!(both.bases()[1].offset, offset_of!(Both, right) as isize);
}

#[test]
fn test_bases_load_at_their_offsets() {
    module();
    let obj = cast_value(both()).unwrap();
    let whole: &Both = load_ref(&obj, false).unwrap();
    let left: &Left = load_ref(&obj, false).unwrap();
    let right: &Right = load_ref(&obj, false).unwrap();

    assert_eq!(whole.own, 3);
    assert_eq!(left.l, 1);
    assert_eq!(right.r, 2);
    assert!(std::ptr::eq(left, &whole.left));
    assert!(std::ptr::eq(right, &whole.right));
}

#[test]
fn test_base_methods_see_base_subobject() {
    module();
    let obj = cast_value(both()).unwrap();
    assert_eq!(obj.call_method("left_value", &[]).unwrap().as_int(), Some(1));
    assert_eq!(obj.call_method("right_value", &[]).unwrap().as_int(), Some(2));
}

#[test]
fn test_base_pointer_finds_derived_wrapper() {
    module();
    let obj = cast_value(both()).unwrap();
    let whole: &Both = load_ref(&obj, false).unwrap();

    let via_right = cast_ref(&whole.right, ReturnPolicy::Reference, None).unwrap();
    assert!(via_right.is(&obj));
    let via_left = cast_ref(&whole.left, ReturnPolicy::Reference, None).unwrap();
    assert!(via_left.is(&obj));
}

// =============================================================================
// Host classes with several native roots
// =============================================================================

fn combined_type() -> (HostType, HostType, HostType) {
    let module = module();
    let left = module.host_type("Left").unwrap().clone();
    let right = module.host_type("Right").unwrap().clone();
    let combined = HostType::new_class("Combined", &[left.clone(), right.clone()]).unwrap();
    (combined, left, right)
}

#[test]
fn test_host_class_gets_one_slot_per_root() {
    let (combined, left, right) = combined_type();
    let roots = all_type_info(&combined).unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0].name(), "Left");
    assert_eq!(roots[1].name(), "Right");

    let obj = combined.call(&[HostObject::int(10)]).unwrap();
    let right_init = right.get_local("__init__").unwrap();
    right_init.call(&[obj.clone(), HostObject::int(20)]).unwrap();

    let instance = Instance::of(&obj).unwrap();
    assert!(!instance.is_simple_layout());
    assert_eq!(instance.slot_count(), 2);

    let right_descriptor = descriptor_of::<Right>(Scope::Global).unwrap();
    assert_eq!(
        determine_load_type(&obj, &right_descriptor).unwrap(),
        LoadType::DerivedMultiRootMatch { slot: 1 }
    );
    assert_eq!(load_ref::<Left>(&obj, false).unwrap().l, 10);
    assert_eq!(load_ref::<Right>(&obj, false).unwrap().r, 20);
    drop(left);
}

#[test]
fn test_root_deriving_from_target_uses_its_slot() {
    let module = module();
    let dog = module.host_type("Dog").unwrap().clone();
    let left = module.host_type("Left").unwrap().clone();
    let show_dog = HostType::new_class("ShowDog", &[dog, left]).unwrap();
    let obj = show_dog.call(&[HostObject::str("Rex"), HostObject::int(4)]).unwrap();

    let animal = descriptor_of::<Animal>(Scope::Global).unwrap();
    assert!(animal.is_simple_type());
    assert_eq!(
        determine_load_type(&obj, &animal).unwrap(),
        LoadType::DerivedMultiRootMatch { slot: 0 }
    );

    let seen_dog = load_ref::<Dog>(&obj, false).unwrap();
    let seen_animal = load_ref::<Animal>(&obj, false).unwrap();
    assert_eq!(seen_dog.tricks, 4);
    assert_eq!(seen_animal.name, "Rex");
    assert!(std::ptr::eq(seen_animal, &seen_dog.base));
}

#[test]
fn test_host_class_with_two_roots_is_ambiguous() {
    let (combined, _, _) = combined_type();
    let err = get_type_info(&combined).unwrap_err();
    assert!(matches!(err, BindError::AmbiguousBases { .. }));
}

#[test]
fn test_uninitialized_slot_is_reported() {
    let (combined, _, _) = combined_type();
    let obj = combined.call(&[HostObject::int(1)]).unwrap();
    let err = load_ref::<Right>(&obj, false).unwrap_err();
    assert!(matches!(err, BindError::NotInitialized { .. }));
}

#[test]
fn test_host_type_without_native_root_cannot_allocate() {
    module();
    let plain = HostType::new_class("Plain", &[]).unwrap();
    assert!(all_type_info(&plain).unwrap().is_empty());
    let obj = plain.call(&[]).unwrap();
    assert!(Instance::of(&obj).is_none());
}

// =============================================================================
// Polymorphism
// =============================================================================

fn boxed_animal(species: Species) -> NativePtr {
    match species {
        Species::Dog => NativePtr::from_box(Box::new(Dog {
            base: Animal {
                species,
                name: "Rex".to_string(),
            },
            tricks: 4,
        })),
        Species::Generic => NativePtr::from_box(Box::new(Animal {
            species,
            name: "Blob".to_string(),
        })),
    }
}

#[test]
fn test_dog_returned_as_animal_is_a_dog() {
    module();
    let animal = descriptor_of::<Animal>(Scope::Global).unwrap();
    let obj = cast(
        Some(boxed_animal(Species::Dog)),
        &animal,
        ReturnPolicy::TakeOwnership,
        None,
        Holder::Empty,
    )
    .unwrap();

    assert_eq!(obj.type_name(), "Dog");
    assert_eq!(obj.call_method("tricks", &[]).unwrap().as_int(), Some(4));
    assert_eq!(obj.call_method("name", &[]).unwrap().as_str(), Some("Rex"));
}

#[test]
fn test_generic_animal_stays_an_animal() {
    module();
    let animal = descriptor_of::<Animal>(Scope::Global).unwrap();
    let obj = cast(
        Some(boxed_animal(Species::Generic)),
        &animal,
        ReturnPolicy::TakeOwnership,
        None,
        Holder::Empty,
    )
    .unwrap();

    assert_eq!(obj.type_name(), "Animal");
    assert_eq!(obj.call_method("name", &[]).unwrap().as_str(), Some("Blob"));
    assert!(obj.call_method("tricks", &[]).is_err());
}

#[test]
fn test_dog_loads_as_single_root_animal() {
    module();
    let animal = descriptor_of::<Animal>(Scope::Global).unwrap();
    let dog = descriptor_of::<Dog>(Scope::Global).unwrap();
    let obj = cast(Some(boxed_animal(Species::Dog)), &dog, ReturnPolicy::TakeOwnership, None, Holder::Empty).unwrap();

    assert!(animal.is_simple_type());
    assert_eq!(determine_load_type(&obj, &animal).unwrap(), LoadType::DerivedSingleRoot);
    assert_eq!(determine_load_type(&obj, &dog).unwrap(), LoadType::ExactNative);
    assert_eq!(load_ref::<Animal>(&obj, false).unwrap().name, "Rex");
}
