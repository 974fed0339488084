//! Integration tests for shared and unique holders: ownership transfer out
//! of the host, move containers, and host subclasses kept alive by native
//! owners.

use std::sync::OnceLock;

use hostbind::{
    BindError, FromHost, HolderKind, HolderState, HostAnchor, HostObject, HostType, Instance, IntoHost,
    MOVE_CONTAINER_ATTR, Module, NativeType, Shared, Unique, Wrapper, load_ref,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug)]
struct Token {
    value: i64,
}

impl NativeType for Token {}

#[derive(Debug)]
struct Coupon {
    code: i64,
}

impl NativeType for Coupon {}

#[derive(Debug)]
struct Gauge {
    level: i64,
}

impl NativeType for Gauge {}

#[derive(Debug)]
struct Widget {
    anchor: HostAnchor,
    size: i64,
}

impl NativeType for Widget {}

impl Wrapper for Widget {
    fn anchor(&self) -> &HostAnchor {
        &self.anchor
    }
}

fn module() -> &'static Module {
    static MODULE: OnceLock<Module> = OnceLock::new();
    MODULE.get_or_init(|| {
        let mut module = Module::new("holders").expect("Failed to create module");
        module
            .class::<Token>("Token")
            .holder(HolderKind::Unique)
            .init(1, |ctx| Ok(Token { value: ctx.arg(0)? }))
            .def("value", 0, |ctx| ctx.this::<Token>()?.value.into_host())
            .build()
            .expect("Failed to register Token");
        module
            .class::<Coupon>("Coupon")
            .holder(HolderKind::Unique)
            .init(1, |ctx| Ok(Coupon { code: ctx.arg(0)? }))
            .build()
            .expect("Failed to register Coupon");
        module
            .def("redeem", 1, |ctx| {
                let token = ctx.arg::<Unique<Token>>(0)?;
                format!("token {}", token.value).into_host()
            })
            .def("redeem", 1, |ctx| {
                let coupon = ctx.arg::<Unique<Coupon>>(0)?;
                format!("coupon {}", coupon.code).into_host()
            })
            .def("amount", 1, |ctx| ctx.arg::<Unique<Token>>(0)?.value.into_host())
            .def("amount", 1, |ctx| ctx.arg::<i64>(0)?.into_host());
        module
            .class::<Gauge>("Gauge")
            .holder(HolderKind::Shared)
            .init(1, |ctx| Ok(Gauge { level: ctx.arg(0)? }))
            .build()
            .expect("Failed to register Gauge");
        module
            .class::<Widget>("Widget")
            .holder(HolderKind::Shared)
            .wrapper()
            .init(1, |ctx| {
                Ok(Widget {
                    anchor: HostAnchor::new(),
                    size: ctx.arg(0)?,
                })
            })
            .build()
            .expect("Failed to register Widget");
        module
    })
}

fn new_token(value: i64) -> HostObject {
    let token_type = module().host_type("Token").unwrap().clone();
    token_type.call(&[HostObject::int(value)]).unwrap()
}

fn new_coupon(code: i64) -> HostObject {
    let coupon_type = module().host_type("Coupon").unwrap().clone();
    coupon_type.call(&[HostObject::int(code)]).unwrap()
}

/// A host object implementing the move-container protocol around `item`.
fn mover(item: HostObject) -> HostObject {
    let mover_type = HostType::new_class("Mover", &[]).unwrap();
    mover_type.set_attr(MOVE_CONTAINER_ATTR, HostObject::bool(true));
    mover_type.set_attr("peek", HostObject::function(|args| args[0].get_attr("_obj")));
    mover_type.set_attr(
        "release",
        HostObject::function(|args| {
            args[0]
                .del_attr("_obj")
                .ok_or_else(|| BindError::Raised(String::from("already released")))
        }),
    );
    let obj = mover_type.call(&[]).unwrap();
    obj.set_attr("_obj", item);
    obj
}

fn custom_widget(size: i64) -> HostObject {
    let widget_type = module().host_type("Widget").unwrap().clone();
    let custom = HostType::new_class("CustomWidget", &[widget_type]).unwrap();
    let obj = custom.call(&[HostObject::int(size)]).unwrap();
    obj.set_attr("color", HostObject::str("red"));
    obj
}

// =============================================================================
// Unique holders
// =============================================================================

#[test]
fn test_unique_from_list_empties_the_list() {
    let list = HostObject::list(vec![new_token(5)]);
    let token = Unique::<Token>::from_host(&list, false).unwrap();

    assert_eq!(token.value, 5);
    assert!(list.items().unwrap()[0].is_none());
}

#[test]
fn test_unique_refuses_shared_item() {
    let obj = new_token(6);
    let list = HostObject::list(vec![obj.clone()]);

    let err = Unique::<Token>::from_host(&list, false).unwrap_err();
    assert!(matches!(err, BindError::NonUniqueReference { count: 2, .. }));
    assert!(list.items().unwrap()[0].is(&obj));
    assert_eq!(obj.call_method("value", &[]).unwrap().as_int(), Some(6));

    let v_h = Instance::of(&obj).unwrap().value_and_holder(0).unwrap();
    assert_eq!(v_h.holder_state(), HolderState::Constructed);
}

#[test]
fn test_unique_needs_a_move_container() {
    let obj = new_token(1);
    let err = Unique::<Token>::from_host(&obj, false).unwrap_err();
    assert!(matches!(err, BindError::UnsupportedMoveContainer { .. }));
}

#[test]
fn test_wrong_unique_type_stays_in_list() {
    let coupon = new_coupon(3);
    let weak = coupon.downgrade();
    let list = HostObject::list(vec![coupon]);

    assert!(Unique::<Token>::load(&list, false).unwrap().is_none());
    assert!(weak.is_alive());
    assert_eq!(list.items().unwrap()[0].type_name(), "Coupon");

    let coupon = Unique::<Coupon>::from_host(&list, false).unwrap();
    assert_eq!(coupon.code, 3);
    assert!(list.items().unwrap()[0].is_none());
}

#[test]
fn test_none_in_list_is_not_a_match() {
    let list = HostObject::list(vec![HostObject::none()]);
    assert!(Unique::<Token>::load(&list, false).unwrap().is_none());
}

#[test]
fn test_unique_overloads_try_each_type() {
    let module = module();

    let coupon = HostObject::list(vec![new_coupon(8)]);
    assert_eq!(module.call("redeem", &[coupon.clone()]).unwrap().as_str(), Some("coupon 8"));
    assert!(coupon.items().unwrap()[0].is_none());

    let token = HostObject::list(vec![new_token(2)]);
    assert_eq!(module.call("redeem", &[token]).unwrap().as_str(), Some("token 2"));
}

#[test]
fn test_unique_overload_falls_through_to_plain_value() {
    let module = module();
    assert_eq!(module.call("amount", &[HostObject::int(3)]).unwrap().as_int(), Some(3));

    let token = HostObject::list(vec![new_token(4)]);
    assert_eq!(module.call("amount", &[token]).unwrap().as_int(), Some(4));
}

#[test]
fn test_unique_from_release_container() {
    let container = mover(new_token(9));
    let token = Unique::<Token>::from_host(&container, false).unwrap();
    assert_eq!(token.value, 9);
    assert!(!container.has_attr("_obj"));
}

#[test]
fn test_release_container_keeps_wrong_type() {
    let container = mover(new_coupon(5));
    assert!(Unique::<Token>::load(&container, false).unwrap().is_none());
    assert_eq!(container.get_attr("_obj").unwrap().type_name(), "Coupon");

    let coupon = Unique::<Coupon>::from_host(&container, false).unwrap();
    assert_eq!(coupon.code, 5);
}

#[test]
fn test_unique_from_owned_handle() {
    let obj = new_token(7);
    let alias = obj.clone();
    let err = Unique::<Token>::from_host_owned(obj).unwrap_err();
    assert!(matches!(err, BindError::NonUniqueReference { count: 2, .. }));

    let mut token = Unique::<Token>::from_host_owned(alias).unwrap();
    token.value += 1;
    assert_eq!(token.value, 8);
}

#[test]
fn test_unique_round_trip() {
    module();
    let obj = Unique::new(Token { value: 11 }).into_host().unwrap();
    assert_eq!(obj.type_name(), "Token");
    assert_eq!(load_ref::<Token>(&obj, false).unwrap().value, 11);

    let token = Unique::<Token>::from_host_owned(obj).unwrap();
    assert_eq!(token.value, 11);
    let again = token.into_host().unwrap();
    assert_eq!(again.call_method("value", &[]).unwrap().as_int(), Some(11));
}

#[test]
fn test_shared_load_of_unique_type_fails() {
    let obj = new_token(2);
    let err = Shared::<Token>::from_host(&obj).unwrap_err();
    assert!(matches!(err, BindError::HolderMismatch { .. }));
}

// =============================================================================
// Shared holders
// =============================================================================

#[test]
fn test_shared_outlives_its_wrapper() {
    let gauge_type = module().host_type("Gauge").unwrap().clone();
    let obj = gauge_type.call(&[HostObject::int(40)]).unwrap();

    let gauge = Shared::<Gauge>::from_host(&obj).unwrap();
    assert_eq!(gauge.use_count(), 2);

    drop(obj);
    assert_eq!(gauge.use_count(), 1);
    assert_eq!(gauge.level, 40);
}

#[test]
fn test_shared_returns_to_existing_wrapper() {
    let gauge_type = module().host_type("Gauge").unwrap().clone();
    let obj = gauge_type.call(&[HostObject::int(1)]).unwrap();

    let gauge = Shared::<Gauge>::from_host(&obj).unwrap();
    let back = gauge.clone().into_host().unwrap();
    assert!(back.is(&obj));
    assert_eq!(gauge.use_count(), 2);
}

#[test]
fn test_fresh_shared_gets_a_new_wrapper() {
    module();
    let gauge = Shared::new(Gauge { level: 3 });
    let obj = gauge.clone().into_host().unwrap();
    assert_eq!(gauge.use_count(), 2);

    let loaded = Shared::<Gauge>::from_host(&obj).unwrap();
    assert!(loaded.same_owner(&gauge));
}

// =============================================================================
// Host subclasses of shared types
// =============================================================================

#[test]
fn test_subclass_state_lives_with_native_owner() {
    let obj = custom_widget(9);
    let weak = obj.downgrade();

    let widget = Shared::<Widget>::from_host(&obj).unwrap();
    assert!(widget.anchor.is_parked());
    assert_eq!(widget.use_count(), 1);

    drop(obj);
    assert!(weak.is_alive());
    assert_eq!(widget.size, 9);

    drop(widget);
    assert!(!weak.is_alive());
}

#[test]
fn test_released_subclass_is_reclaimed() {
    let obj = custom_widget(4);
    let id = obj.id();
    let widget = Shared::<Widget>::from_host(&obj).unwrap();
    drop(obj);

    let back = widget.clone().into_host().unwrap();
    assert_eq!(back.id(), id);
    assert_eq!(back.type_name(), "CustomWidget");
    assert_eq!(back.get_attr("color").unwrap().as_str(), Some("red"));
    assert!(!widget.anchor.is_parked());
    assert_eq!(widget.use_count(), 2);

    let v_h = Instance::of(&back).unwrap().value_and_holder(0).unwrap();
    assert_eq!(v_h.holder_state(), HolderState::Constructed);
}

#[test]
fn test_plain_widget_is_not_released() {
    let widget_type = module().host_type("Widget").unwrap().clone();
    let obj = widget_type.call(&[HostObject::int(2)]).unwrap();

    let widget = Shared::<Widget>::from_host(&obj).unwrap();
    assert!(!widget.anchor.is_parked());
    assert_eq!(widget.use_count(), 2);
}
