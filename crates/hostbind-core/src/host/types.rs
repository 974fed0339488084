//! Host type objects.
//!
//! A [`HostType`] is a shared handle to a class object of the host runtime:
//! an ordered list of declared bases, a linearized method resolution order,
//! an attribute dictionary and an optional allocation hook that builds the
//! payload of new instances. Host types compare by identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::object::{HostObject, Payload};
use crate::{BindError, BindResult};

bitflags! {
    /// Properties of a host type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// One of the runtime's builtin types.
        const BUILTIN = 1 << 0;
        /// Created by the binding layer for a registered native type.
        const NATIVE = 1 << 1;
        /// Cannot be subclassed.
        const FINAL = 1 << 2;
    }
}

/// Unique, monotonically assigned host type identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTypeId(u64);

impl HostTypeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HostTypeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Builds the payload for a new instance of a type.
pub type AllocFn = Arc<dyn Fn(&HostType) -> BindResult<Payload> + Send + Sync>;

struct TypeObject {
    id: HostTypeId,
    name: String,
    bases: Vec<HostType>,
    mro: Vec<HostType>,
    flags: TypeFlags,
    alloc: Option<AllocFn>,
    dict: RwLock<FxHashMap<String, HostObject>>,
}

/// Handle to a host class object.
#[derive(Clone)]
pub struct HostType(Arc<TypeObject>);

impl HostType {
    /// Start building a new type.
    pub fn builder(name: impl Into<String>) -> HostTypeBuilder {
        HostTypeBuilder {
            name: name.into(),
            bases: Vec::new(),
            flags: TypeFlags::empty(),
            alloc: None,
        }
    }

    /// Define a host-side class deriving from `bases`, the way a script
    /// `class Child(Base): ...` statement would.
    pub fn new_class(name: impl Into<String>, bases: &[HostType]) -> BindResult<HostType> {
        Self::builder(name).bases(bases.iter().cloned()).build()
    }

    /// Identity of this type.
    pub fn id(&self) -> HostTypeId {
        self.0.id
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Declared direct bases, in declaration order.
    pub fn bases(&self) -> &[HostType] {
        &self.0.bases
    }

    /// Linearized ancestors, nearest first. Does not include `self`.
    pub fn mro(&self) -> &[HostType] {
        &self.0.mro
    }

    pub fn flags(&self) -> TypeFlags {
        self.0.flags
    }

    /// Whether the binding layer created this type for a native type.
    pub fn is_native(&self) -> bool {
        self.0.flags.contains(TypeFlags::NATIVE)
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_subtype_of(&self, other: &HostType) -> bool {
        self == other || self.0.mro.iter().any(|t| t == other)
    }

    /// The allocation hook, inherited from the nearest ancestor that has one.
    pub fn alloc_hook(&self) -> Option<&AllocFn> {
        self.0.alloc.as_ref()
    }

    /// Attribute defined directly on this type.
    pub fn get_local(&self, name: &str) -> Option<HostObject> {
        self.0.dict.read().get(name).cloned()
    }

    /// Whether this type defines `name` itself.
    pub fn has_local(&self, name: &str) -> bool {
        self.0.dict.read().contains_key(name)
    }

    /// Attribute lookup along the resolution order.
    pub fn lookup(&self, name: &str) -> Option<HostObject> {
        self.lookup_with_owner(name).map(|(value, _)| value)
    }

    /// Attribute lookup that also reports which type defined the attribute.
    pub fn lookup_with_owner(&self, name: &str) -> Option<(HostObject, HostType)> {
        std::iter::once(self)
            .chain(self.0.mro.iter())
            .find_map(|ty| ty.get_local(name).map(|value| (value, ty.clone())))
    }

    /// Set an attribute on the type itself.
    pub fn set_attr(&self, name: impl Into<String>, value: HostObject) {
        self.0.dict.write().insert(name.into(), value);
    }

    /// Remove every attribute, returning them so the caller controls when
    /// they are dropped.
    pub fn clear_attrs(&self) -> Vec<HostObject> {
        self.0.dict.write().drain().map(|(_, value)| value).collect()
    }

    /// Allocate an instance without running `__init__`.
    pub fn allocate(&self) -> BindResult<HostObject> {
        let payload = match &self.0.alloc {
            Some(alloc) => alloc(self)?,
            None => Payload::Plain,
        };
        Ok(HostObject::new(self.clone(), payload))
    }

    /// Instantiate the type: allocate, then run `__init__` if one is defined.
    pub fn call(&self, args: &[HostObject]) -> BindResult<HostObject> {
        if self.0.flags.contains(TypeFlags::BUILTIN) {
            return Err(BindError::NotCallable {
                type_name: format!("type '{}'", self.name()),
            });
        }
        let obj = self.allocate()?;
        if let Some(init) = self.lookup("__init__") {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(obj.clone());
            full.extend_from_slice(args);
            init.call(&full)?;
        }
        Ok(obj)
    }
}

impl PartialEq for HostType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for HostType {}

impl Hash for HostType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.0.name)
    }
}

/// Builder for [`HostType`].
pub struct HostTypeBuilder {
    name: String,
    bases: Vec<HostType>,
    flags: TypeFlags,
    alloc: Option<AllocFn>,
}

impl HostTypeBuilder {
    /// Add a declared base.
    pub fn base(mut self, base: HostType) -> Self {
        self.bases.push(base);
        self
    }

    /// Add several declared bases.
    pub fn bases(mut self, bases: impl IntoIterator<Item = HostType>) -> Self {
        self.bases.extend(bases);
        self
    }

    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Install the allocation hook for instances of this type and its
    /// subclasses.
    pub fn alloc(mut self, alloc: AllocFn) -> Self {
        self.alloc = Some(alloc);
        self
    }

    /// Finish the type, linearizing its bases.
    pub fn build(self) -> BindResult<HostType> {
        let bases = if self.bases.is_empty() {
            vec![builtins::OBJECT.clone()]
        } else {
            self.bases
        };

        if let Some(sealed) = bases.iter().find(|b| b.flags().contains(TypeFlags::FINAL)) {
            return Err(BindError::Raised(format!(
                "type '{}' is not an acceptable base type",
                sealed.name()
            )));
        }

        let mro = linearize(&bases).ok_or_else(|| {
            BindError::Raised(format!(
                "cannot create a consistent method resolution order for '{}'",
                self.name
            ))
        })?;

        let alloc = self
            .alloc
            .or_else(|| mro.iter().find_map(|ty| ty.0.alloc.clone()));

        Ok(HostType(Arc::new(TypeObject {
            id: HostTypeId::next(),
            name: self.name,
            bases,
            mro,
            flags: self.flags,
            alloc,
            dict: RwLock::new(FxHashMap::default()),
        })))
    }
}

/// C3 linearization of the given bases.
fn linearize(bases: &[HostType]) -> Option<Vec<HostType>> {
    let mut seqs: Vec<Vec<HostType>> = bases
        .iter()
        .map(|b| {
            let mut seq = Vec::with_capacity(b.mro().len() + 1);
            seq.push(b.clone());
            seq.extend(b.mro().iter().cloned());
            seq
        })
        .collect();
    seqs.push(bases.to_vec());

    let mut out = Vec::new();
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            return Some(out);
        }

        let head = seqs
            .iter()
            .map(|s| &s[0])
            .find(|&candidate| !seqs.iter().any(|s| s[1..].contains(candidate)))?
            .clone();

        for seq in seqs.iter_mut() {
            if seq[0] == head {
                seq.remove(0);
            }
        }
        out.push(head);
    }
}

/// The runtime's builtin types.
pub mod builtins {
    use super::*;

    fn builtin(name: &str, bases: Vec<HostType>) -> HostType {
        let mro = bases
            .iter()
            .flat_map(|b| std::iter::once(b.clone()).chain(b.mro().iter().cloned()))
            .collect();
        HostType(Arc::new(TypeObject {
            id: HostTypeId::next(),
            name: name.to_string(),
            bases,
            mro,
            flags: TypeFlags::BUILTIN,
            alloc: None,
            dict: RwLock::new(FxHashMap::default()),
        }))
    }

    lazy_static! {
        /// Root of every type.
        pub static ref OBJECT: HostType = builtin("object", Vec::new());
        pub static ref NONE_TYPE: HostType = builtin("NoneType", vec![OBJECT.clone()]);
        pub static ref BOOL: HostType = builtin("bool", vec![OBJECT.clone()]);
        pub static ref INT: HostType = builtin("int", vec![OBJECT.clone()]);
        pub static ref FLOAT: HostType = builtin("float", vec![OBJECT.clone()]);
        pub static ref STR: HostType = builtin("str", vec![OBJECT.clone()]);
        pub static ref LIST: HostType = builtin("list", vec![OBJECT.clone()]);
        pub static ref TUPLE: HostType = builtin("tuple", vec![OBJECT.clone()]);
        pub static ref FUNCTION: HostType = builtin("function", vec![OBJECT.clone()]);
        pub static ref CAPSULE: HostType = builtin("capsule", vec![OBJECT.clone()]);
    }
}
