//! Reference-counted host objects.
//!
//! A [`HostObject`] is a strong reference; cloning it is the host runtime's
//! "incref" and dropping it is "decref". The strong count of the underlying
//! `Arc` is therefore the host reference count that ownership transfer checks
//! against. [`HostWeak`] is the weak liveness weak.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::types::{HostType, builtins};
use crate::{BindError, BindResult};

/// A host callable.
pub type HostFn = Arc<dyn Fn(&[HostObject]) -> BindResult<HostObject> + Send + Sync>;

/// Extension payload carried by wrappers of native values.
pub trait NativeData: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// The value carried by a host object.
pub enum Payload {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Mutex<Vec<HostObject>>),
    Tuple(Vec<HostObject>),
    Function(HostFn),
    Capsule(Arc<dyn Any + Send + Sync>),
    Native(Box<dyn NativeData>),
    /// Instance of a host-only class; state lives in the attribute dictionary.
    Plain,
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Bool(v) => write!(f, "Bool({v})"),
            Payload::Int(v) => write!(f, "Int({v})"),
            Payload::Float(v) => write!(f, "Float({v})"),
            Payload::Str(v) => write!(f, "Str({v:?})"),
            Payload::List(items) => write!(f, "List(len={})", items.lock().len()),
            Payload::Tuple(items) => write!(f, "Tuple(len={})", items.len()),
            Payload::Function(_) => write!(f, "Function"),
            Payload::Capsule(_) => write!(f, "Capsule"),
            Payload::Native(_) => write!(f, "Native"),
            Payload::Plain => write!(f, "Plain"),
        }
    }
}

struct ObjectInner {
    ty: HostType,
    payload: Payload,
    attrs: Mutex<FxHashMap<String, HostObject>>,
    patients: Mutex<Vec<HostObject>>,
}

lazy_static! {
    static ref NONE: HostObject = HostObject::new(builtins::NONE_TYPE.clone(), Payload::None);
    static ref TRUE: HostObject = HostObject::new(builtins::BOOL.clone(), Payload::Bool(true));
    static ref FALSE: HostObject = HostObject::new(builtins::BOOL.clone(), Payload::Bool(false));
}

/// Strong reference to a host object.
#[derive(Clone)]
pub struct HostObject(Arc<ObjectInner>);

impl HostObject {
    /// Create an object of `ty` carrying `payload`.
    pub fn new(ty: HostType, payload: Payload) -> Self {
        HostObject(Arc::new(ObjectInner {
            ty,
            payload,
            attrs: Mutex::new(FxHashMap::default()),
            patients: Mutex::new(Vec::new()),
        }))
    }

    // ==========================================================================
    // Builtin constructors
    // ==========================================================================

    /// The none singleton.
    pub fn none() -> Self {
        NONE.clone()
    }

    pub fn bool(value: bool) -> Self {
        if value { TRUE.clone() } else { FALSE.clone() }
    }

    pub fn int(value: i64) -> Self {
        Self::new(builtins::INT.clone(), Payload::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(builtins::FLOAT.clone(), Payload::Float(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::new(builtins::STR.clone(), Payload::Str(value.into()))
    }

    pub fn list(items: Vec<HostObject>) -> Self {
        Self::new(builtins::LIST.clone(), Payload::List(Mutex::new(items)))
    }

    pub fn tuple(items: Vec<HostObject>) -> Self {
        Self::new(builtins::TUPLE.clone(), Payload::Tuple(items))
    }

    /// Wrap a Rust closure as a host callable.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[HostObject]) -> BindResult<HostObject> + Send + Sync + 'static,
    {
        Self::new(builtins::FUNCTION.clone(), Payload::Function(Arc::new(f)))
    }

    /// Wrap an opaque value.
    pub fn capsule<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(builtins::CAPSULE.clone(), Payload::Capsule(Arc::new(value)))
    }

    // ==========================================================================
    // Identity and reference counting
    // ==========================================================================

    /// Type of this object.
    pub fn type_(&self) -> &HostType {
        &self.0.ty
    }

    pub fn type_name(&self) -> &str {
        self.0.ty.name()
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// Identity comparison (`a is b`).
    pub fn is(&self, other: &HostObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Number of strong references, including this one.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> HostWeak {
        HostWeak(Arc::downgrade(&self.0))
    }

    pub fn is_instance(&self, ty: &HostType) -> bool {
        self.0.ty.is_subtype_of(ty)
    }

    // ==========================================================================
    // Builtin accessors
    // ==========================================================================

    pub fn is_none(&self) -> bool {
        matches!(self.0.payload, Payload::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.0.payload {
            Payload::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.0.payload {
            Payload::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.0.payload {
            Payload::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.0.payload {
            Payload::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.0.payload, Payload::List(_))
    }

    /// Snapshot of list or tuple items.
    pub fn items(&self) -> Option<Vec<HostObject>> {
        match &self.0.payload {
            Payload::List(items) => Some(items.lock().clone()),
            Payload::Tuple(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// Length of a list or tuple.
    pub fn len(&self) -> Option<usize> {
        match &self.0.payload {
            Payload::List(items) => Some(items.lock().len()),
            Payload::Tuple(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Replace a list item, returning the previous one.
    pub fn list_replace(&self, index: usize, value: HostObject) -> BindResult<HostObject> {
        match &self.0.payload {
            Payload::List(items) => {
                let mut items = items.lock();
                let count = items.len();
                let slot = items
                    .get_mut(index)
                    .ok_or(BindError::ArgumentIndexOutOfBounds { index, count })?;
                Ok(std::mem::replace(slot, value))
            }
            _ => Err(BindError::mismatch("list", self.type_name())),
        }
    }

    pub fn list_push(&self, value: HostObject) -> BindResult<()> {
        match &self.0.payload {
            Payload::List(items) => {
                items.lock().push(value);
                Ok(())
            }
            _ => Err(BindError::mismatch("list", self.type_name())),
        }
    }

    /// Downcast a capsule.
    pub fn capsule_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        match &self.0.payload {
            Payload::Capsule(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Downcast the native extension payload.
    pub fn native_data<T: NativeData>(&self) -> Option<&T> {
        match &self.0.payload {
            Payload::Native(data) => data.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    // ==========================================================================
    // Attributes and calls
    // ==========================================================================

    /// Attribute lookup: instance dictionary first, then the type. Functions
    /// found on the type are bound to `self`.
    pub fn get_attr(&self, name: &str) -> BindResult<HostObject> {
        if let Some(value) = self.0.attrs.lock().get(name).cloned() {
            return Ok(value);
        }
        match self.0.ty.lookup(name) {
            Some(value) => Ok(self.bind(value)),
            None => Err(BindError::AttributeError {
                object: format!("'{}' object", self.type_name()),
                name: name.to_string(),
            }),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.0.attrs.lock().contains_key(name) || self.0.ty.lookup(name).is_some()
    }

    pub fn set_attr(&self, name: impl Into<String>, value: HostObject) {
        self.0.attrs.lock().insert(name.into(), value);
    }

    pub fn del_attr(&self, name: &str) -> Option<HostObject> {
        self.0.attrs.lock().remove(name)
    }

    fn bind(&self, value: HostObject) -> HostObject {
        match &value.0.payload {
            Payload::Function(f) => {
                let f = Arc::clone(f);
                let receiver = self.clone();
                HostObject::function(move |args| {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(receiver.clone());
                    full.extend_from_slice(args);
                    f(&full)
                })
            }
            _ => value,
        }
    }

    /// Call this object.
    pub fn call(&self, args: &[HostObject]) -> BindResult<HostObject> {
        match &self.0.payload {
            Payload::Function(f) => f(args),
            _ => Err(BindError::NotCallable {
                type_name: format!("'{}'", self.type_name()),
            }),
        }
    }

    /// Look up and call a method.
    pub fn call_method(&self, name: &str, args: &[HostObject]) -> BindResult<HostObject> {
        self.get_attr(name)?.call(args)
    }

    // ==========================================================================
    // Lifetime coupling
    // ==========================================================================

    /// Keep `patient` alive for as long as this object is alive.
    pub fn retain(&self, patient: HostObject) {
        self.0.patients.lock().push(patient);
    }

    /// Number of patients retained by this object.
    pub fn patient_count(&self) -> usize {
        self.0.patients.lock().len()
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.payload {
            Payload::None => write!(f, "None"),
            Payload::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Payload::Int(v) => write!(f, "{v}"),
            Payload::Float(v) => write!(f, "{v:?}"),
            Payload::Str(v) => write!(f, "{v:?}"),
            Payload::List(items) => f.debug_list().entries(items.lock().iter()).finish(),
            Payload::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items {
                    t.field(item);
                }
                t.finish()
            }
            _ => write!(f, "<{} object at {:#x}>", self.type_name(), self.id()),
        }
    }
}

/// Weak reference to a host object.
#[derive(Clone)]
pub struct HostWeak(Weak<ObjectInner>);

impl HostWeak {
    pub fn upgrade(&self) -> Option<HostObject> {
        self.0.upgrade().map(HostObject)
    }

    /// Whether the referent is still alive.
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Whether this weak reference points at `obj`.
    pub fn points_to(&self, obj: &HostObject) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&obj.0))
    }
}

impl fmt::Debug for HostWeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<weakref at {:#x}>", self.0.as_ptr() as usize)
    }
}
