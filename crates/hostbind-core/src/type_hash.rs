//! Deterministic hash-based native type identity.
//!
//! This module provides [`TypeHash`], a 64-bit hash that identifies a native
//! type across independently registered modules. Unlike `std::any::TypeId`,
//! the hash is computed from the type's name, so two modules that link the
//! same native type agree on its identity without sharing any state:
//!
//! - Same name = same hash (stable across modules)
//! - Forward references (hash computed before registration)
//! - Single map lookups in every registry
//!
//! # Hash Computation
//!
//! Uses XXHash64 mixed with a domain constant so that native identities never
//! collide with other hashed keys (shared-data tokens, method names).
//!
//! # Examples
//!
//! ```
//! use hostbind_core::TypeHash;
//!
//! struct Dog;
//!
//! let a = TypeHash::of::<Dog>();
//! let b = TypeHash::from_name(std::any::type_name::<Dog>());
//! assert_eq!(a, b);
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for native type identities.
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for shared-data tokens.
    pub const TOKEN: u64 = 0x1a095090689d4647;
}

/// A deterministic 64-bit hash identifying a native type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a fully qualified native type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Create the identity of a Rust type from its qualified type name.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }

    /// Create a hash for a shared-data token.
    #[inline]
    pub fn from_token(token: &str) -> Self {
        TypeHash(hash_constants::TOKEN ^ xxh64(token.as_bytes(), 0))
    }

    /// Check if this is an empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Strip module paths from a Rust type name.
///
/// `alloc::boxed::Box<zoo::animals::Dog>` becomes `Box<Dog>`. Used for every
/// user-facing message that names a native type.
pub fn clean_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut segment = String::new();

    for ch in name.chars() {
        match ch {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' | '*' => {
                out.push_str(&segment);
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(&segment);
    out
}
