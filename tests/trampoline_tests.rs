//! Integration tests for host overrides of native virtual methods.

use std::sync::OnceLock;

use hostbind::{
    BindError, BindResult, HostAnchor, HostObject, HostType, IntoHost, Module, NativeType, Wrapper, get_override,
    load_ref, overload, overload_pure,
};

#[derive(Debug)]
struct Speaker {
    anchor: HostAnchor,
    name: String,
}

impl NativeType for Speaker {}

impl Wrapper for Speaker {
    fn anchor(&self) -> &HostAnchor {
        &self.anchor
    }
}

impl Speaker {
    fn speak(&self) -> BindResult<String> {
        overload(self, "speak", (), |this: &Self| format!("{} speaks", this.name))
    }

    fn shout(&self, times: i64) -> BindResult<String> {
        overload_pure(self, "shout", (times,))
    }
}

fn module() -> &'static Module {
    static MODULE: OnceLock<Module> = OnceLock::new();
    MODULE.get_or_init(|| {
        let mut module = Module::new("trampolines").expect("Failed to create module");
        module
            .class::<Speaker>("Speaker")
            .wrapper()
            .init(1, |ctx| {
                Ok(Speaker {
                    anchor: HostAnchor::new(),
                    name: ctx.arg(0)?,
                })
            })
            .def("speak", 0, |ctx| ctx.this::<Speaker>()?.speak()?.into_host())
            .build()
            .expect("Failed to register Speaker");
        module
            .def("announce", 1, |ctx| ctx.arg_ref::<Speaker>(0)?.speak()?.into_host())
            .def("rally", 2, |ctx| {
                let speaker = ctx.arg_ref::<Speaker>(0)?;
                speaker.shout(ctx.arg(1)?)?.into_host()
            });
        module
    })
}

fn speaker_type() -> HostType {
    module().host_type("Speaker").unwrap().clone()
}

fn subclass(name: &str) -> HostType {
    HostType::new_class(name, &[speaker_type()]).unwrap()
}

#[test]
fn test_native_default_without_override() {
    let module = module();
    let obj = speaker_type().call(&[HostObject::str("Rex")]).unwrap();

    let said = module.call("announce", &[obj.clone()]).unwrap();
    assert_eq!(said.as_str(), Some("Rex speaks"));
    let speaker = load_ref::<Speaker>(&obj, false).unwrap();
    assert!(get_override(speaker, "speak").unwrap().is_none());
}

#[test]
fn test_host_override_is_used() {
    let module = module();
    let parrot = subclass("Parrot");
    parrot.set_attr(
        "speak",
        HostObject::function(|_args| Ok(HostObject::str("squawk"))),
    );
    let obj = parrot.call(&[HostObject::str("Polly")]).unwrap();

    let said = module.call("announce", &[obj.clone()]).unwrap();
    assert_eq!(said.as_str(), Some("squawk"));
    let speaker = load_ref::<Speaker>(&obj, false).unwrap();
    assert!(get_override(speaker, "speak").unwrap().is_some());
}

#[test]
fn test_override_calling_native_base_does_not_recurse() {
    let module = module();
    let base_speak = speaker_type().get_local("speak").unwrap();
    let loud = subclass("Loud");
    loud.set_attr(
        "speak",
        HostObject::function(move |args| {
            let base = base_speak.call(args)?;
            let base = base.as_str().unwrap_or_default();
            Ok(HostObject::str(format!("{base} loudly")))
        }),
    );
    let obj = loud.call(&[HostObject::str("Max")]).unwrap();

    let said = module.call("announce", &[obj]).unwrap();
    assert_eq!(said.as_str(), Some("Max speaks loudly"));
}

#[test]
fn test_override_errors_propagate() {
    let module = module();
    let broken = subclass("Broken");
    broken.set_attr(
        "speak",
        HostObject::function(|_args| Err(BindError::Raised(String::from("lost voice")))),
    );
    let obj = broken.call(&[HostObject::str("Ace")]).unwrap();

    let err = module.call("announce", &[obj]).unwrap_err();
    assert_eq!(err, BindError::Raised(String::from("lost voice")));
}

#[test]
fn test_pure_method_needs_override() {
    let module = module();
    let obj = speaker_type().call(&[HostObject::str("Rex")]).unwrap();

    let err = module.call("rally", &[obj, HostObject::int(2)]).unwrap_err();
    assert!(matches!(err, BindError::PureVirtualNotOverridden { method, .. } if method == "shout"));
}

#[test]
fn test_pure_method_override_receives_arguments() {
    let module = module();
    let crier = subclass("Crier");
    crier.set_attr(
        "shout",
        HostObject::function(|args| {
            let times = args.get(1).and_then(HostObject::as_int).unwrap_or(0);
            Ok(HostObject::str("HEY ".repeat(times as usize).trim_end().to_string()))
        }),
    );
    let obj = crier.call(&[HostObject::str("Town")]).unwrap();

    let said = module.call("rally", &[obj, HostObject::int(3)]).unwrap();
    assert_eq!(said.as_str(), Some("HEY HEY HEY"));
}
