//! Integration tests for casting between host objects and registered types:
//! identity, return policies, round trips and value extraction.

use std::sync::OnceLock;

use hostbind::{
    BindError, Holder, HostObject, Instance, IntoHost, Module, NativeBox, NativePtr, NativeType, ReturnPolicy, Scope,
    cast, cast_ref, cast_value, descriptor_of, load_ref, take,
};

#[derive(Debug, Clone, Default, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

impl NativeType for Point {}

/// Registered without copy or move support.
#[derive(Debug, PartialEq)]
struct Handle {
    fd: i64,
}

impl NativeType for Handle {}

fn module() -> &'static Module {
    static MODULE: OnceLock<Module> = OnceLock::new();
    MODULE.get_or_init(|| {
        let mut module = Module::new("casting").expect("Failed to create module");
        module
            .class::<Point>("Point")
            .copyable()
            .movable()
            .init(2, |ctx| {
                Ok(Point {
                    x: ctx.arg(0)?,
                    y: ctx.arg(1)?,
                })
            })
            .def("sum", 0, |ctx| {
                let p = ctx.this::<Point>()?;
                (p.x + p.y).into_host()
            })
            .build()
            .expect("Failed to register Point");
        module
            .class::<Handle>("Handle")
            .init(1, |ctx| Ok(Handle { fd: ctx.arg(0)? }))
            .build()
            .expect("Failed to register Handle");
        module
    })
}

// =============================================================================
// Identity
// =============================================================================

#[test]
fn test_same_address_same_wrapper() {
    module();
    let value = Point { x: 1, y: 2 };
    let a = cast_ref(&value, ReturnPolicy::Reference, None).unwrap();
    let b = cast_ref(&value, ReturnPolicy::Reference, None).unwrap();
    assert!(a.is(&b));
    assert!(!Instance::of(&a).unwrap().owned());

    let seen: &Point = load_ref(&a, false).unwrap();
    assert!(std::ptr::eq(seen, &value));

    drop((a, b));
    let c = cast_ref(&value, ReturnPolicy::Reference, None).unwrap();
    assert_eq!(c.ref_count(), 1);
}

#[test]
fn test_take_ownership_twice_yields_one_owner() {
    module();
    let descriptor = descriptor_of::<Point>(Scope::Global).unwrap();
    let ptr = NativePtr::from_box(Box::new(Point { x: 3, y: 4 }));

    let first = cast(Some(ptr), &descriptor, ReturnPolicy::TakeOwnership, None, Holder::Empty).unwrap();
    let second = cast(Some(ptr), &descriptor, ReturnPolicy::TakeOwnership, None, Holder::Empty).unwrap();
    assert!(first.is(&second));
    assert!(Instance::of(&first).unwrap().owned());
}

#[test]
fn test_null_casts_to_none() {
    module();
    let descriptor = descriptor_of::<Point>(Scope::Global).unwrap();
    let obj = cast(None, &descriptor, ReturnPolicy::Copy, None, Holder::Empty).unwrap();
    assert!(obj.is_none());
}

// =============================================================================
// Return policies
// =============================================================================

#[test]
fn test_copy_policy_makes_independent_values() {
    module();
    let value = Point { x: 5, y: 6 };
    let c1 = cast_ref(&value, ReturnPolicy::Copy, None).unwrap();
    let c2 = cast_ref(&value, ReturnPolicy::Copy, None).unwrap();
    assert!(!c1.is(&c2));

    let p1: &Point = load_ref(&c1, false).unwrap();
    let p2: &Point = load_ref(&c2, false).unwrap();
    assert_eq!(p1, &value);
    assert!(!std::ptr::eq(p1, &value));
    assert!(!std::ptr::eq(p1, p2));
    assert!(Instance::of(&c1).unwrap().owned());
}

#[test]
fn test_automatic_reference_copies() {
    module();
    let value = Point { x: 1, y: 1 };
    let obj = cast_ref(&value, ReturnPolicy::Automatic, None).unwrap();
    let seen: &Point = load_ref(&obj, false).unwrap();
    assert!(!std::ptr::eq(seen, &value));
}

#[test]
fn test_move_policy_leaves_source_defaulted() {
    module();
    let descriptor = descriptor_of::<Point>(Scope::Global).unwrap();
    let mut value = Point { x: 7, y: 8 };
    let obj = cast(
        Some(NativePtr::from_mut(&mut value)),
        &descriptor,
        ReturnPolicy::Move,
        None,
        Holder::Empty,
    )
    .unwrap();

    assert_eq!(value, Point::default());
    assert_eq!(load_ref::<Point>(&obj, false).unwrap(), &Point { x: 7, y: 8 });
}

#[test]
fn test_copy_and_move_need_constructors() {
    module();
    let handle = Handle { fd: 3 };
    let err = cast_ref(&handle, ReturnPolicy::Copy, None).unwrap_err();
    assert!(matches!(err, BindError::NotCopyable { .. }));

    let descriptor = descriptor_of::<Handle>(Scope::Global).unwrap();
    let mut other = Handle { fd: 4 };
    let err = cast(
        Some(NativePtr::from_mut(&mut other)),
        &descriptor,
        ReturnPolicy::Move,
        None,
        Holder::Empty,
    )
    .unwrap_err();
    assert!(matches!(err, BindError::NotMovableOrCopyable { .. }));
    assert_eq!(other.fd, 4);
}

#[test]
fn test_holder_requires_owning_policy() {
    module();
    let descriptor = descriptor_of::<Point>(Scope::Global).unwrap();
    let value = Point::default();
    let holder = Holder::Unique(NativeBox::new(Point::default()));
    let err = cast(
        Some(NativePtr::from_ref(&value)),
        &descriptor,
        ReturnPolicy::Reference,
        None,
        holder,
    )
    .unwrap_err();
    assert!(matches!(err, BindError::HolderMismatch { .. }));
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_value_round_trip() {
    module();
    let obj = cast_value(Point { x: 10, y: -2 }).unwrap();
    assert_eq!(obj.type_name(), "Point");
    assert_eq!(obj.call_method("sum", &[]).unwrap().as_int(), Some(8));

    let back: Point = take(obj).unwrap();
    assert_eq!(back, Point { x: 10, y: -2 });
}

#[test]
fn test_boxed_into_host() {
    module();
    let obj = Box::new(Point { x: 1, y: 2 }).into_host().unwrap();
    assert_eq!(load_ref::<Point>(&obj, false).unwrap().y, 2);
}

#[test]
fn test_constructed_through_host_type() {
    let host_type = module().host_type("Point").unwrap().clone();
    let obj = host_type.call(&[HostObject::int(2), HostObject::int(3)]).unwrap();
    assert_eq!(obj.call_method("sum", &[]).unwrap().as_int(), Some(5));
}

#[test]
fn test_take_copies_shared_values() {
    module();
    let obj = cast_value(Point { x: 1, y: 1 }).unwrap();
    let alias = obj.clone();
    let copy: Point = take(obj).unwrap();
    assert_eq!(copy, Point { x: 1, y: 1 });
    // The shared wrapper still holds the original value.
    assert_eq!(load_ref::<Point>(&alias, false).unwrap(), &Point { x: 1, y: 1 });
}

#[test]
fn test_take_refuses_shared_move_only_values() {
    let host_type = module().host_type("Handle").unwrap().clone();
    let obj = host_type.call(&[HostObject::int(9)]).unwrap();
    let alias = obj.clone();
    let err = take::<Handle>(obj).unwrap_err();
    assert!(matches!(err, BindError::NonUniqueReference { count: 2, .. }));
    assert_eq!(load_ref::<Handle>(&alias, false).unwrap().fd, 9);
}

#[test]
fn test_wrong_type_is_a_mismatch() {
    module();
    let obj = cast_value(Point::default()).unwrap();
    let err = load_ref::<Handle>(&obj, false).unwrap_err();
    assert!(err.is_mismatch());
    assert!(load_ref::<Point>(&HostObject::int(1), true).is_err());
}

#[test]
fn test_none_loads_as_null_only_when_converting() {
    module();
    let err = load_ref::<Point>(&HostObject::none(), false).unwrap_err();
    assert!(err.is_mismatch());
    let err = load_ref::<Point>(&HostObject::none(), true).unwrap_err();
    assert!(matches!(err, BindError::ReferenceCast { .. }));
}

#[test]
fn test_unregistered_type_fails() {
    struct Stranger;
    impl NativeType for Stranger {}

    let err = cast_value(Stranger).unwrap_err();
    assert!(matches!(err, BindError::Unregistered { type_name } if type_name.contains("Stranger")));
}
