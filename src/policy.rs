//! Ownership policies and caster kinds.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// How a native value handed to the host is owned afterwards.
///
/// # Example
///
/// ```
/// use hostbind::ReturnPolicy;
///
/// assert!(ReturnPolicy::TakeOwnership.takes_ownership());
/// assert_eq!(ReturnPolicy::Automatic.for_reference(), ReturnPolicy::Copy);
/// assert_eq!(ReturnPolicy::AutomaticReference.for_pointer(), ReturnPolicy::Reference);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ReturnPolicy {
    /// Take ownership of pointers, copy references.
    #[default]
    Automatic = 0,
    /// Like `Automatic`, but reference pointers instead of owning them.
    AutomaticReference = 1,
    /// The wrapper owns the value and frees it on destruction.
    TakeOwnership = 2,
    /// The wrapper owns a fresh copy.
    Copy = 3,
    /// The wrapper owns a value moved out of the source (copied if not movable).
    Move = 4,
    /// The wrapper borrows the value; native code keeps ownership.
    Reference = 5,
    /// Like `Reference`, and the wrapper keeps its parent alive.
    ReferenceInternal = 6,
}

impl ReturnPolicy {
    /// Whether a wrapper created under this policy owns the native value it
    /// was given, without making a copy.
    pub fn takes_ownership(self) -> bool {
        matches!(self, ReturnPolicy::Automatic | ReturnPolicy::TakeOwnership)
    }

    /// Resolve the automatic policies for a value passed by reference.
    pub fn for_reference(self) -> Self {
        match self {
            ReturnPolicy::Automatic | ReturnPolicy::AutomaticReference => ReturnPolicy::Copy,
            other => other,
        }
    }

    /// Resolve the automatic policies for a heap pointer.
    pub fn for_pointer(self) -> Self {
        match self {
            ReturnPolicy::Automatic => ReturnPolicy::TakeOwnership,
            ReturnPolicy::AutomaticReference => ReturnPolicy::Reference,
            other => other,
        }
    }

    /// By-value results are always moved, whatever policy was requested.
    pub fn for_value(self) -> Self {
        ReturnPolicy::Move
    }
}

/// Ownership wrapper a registered type is held by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum HolderKind {
    /// The wrapper owns the value directly.
    #[default]
    None = 0,
    /// Exclusive ownership; moved across the boundary.
    Unique = 1,
    /// Reference-counted shared ownership.
    Shared = 2,
}

/// The closed set of conversion strategies.
///
/// Registered types choose theirs once, from their holder kind; builtin
/// conversions report a fixed kind through `FromHost::KIND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive)]
#[repr(u8)]
pub enum CasterKind {
    Primitive = 0,
    String = 1,
    Sequence = 2,
    Generic = 3,
    HolderCopyable = 4,
    HolderMoveOnly = 5,
    PassThrough = 6,
}

impl CasterKind {
    /// Caster kind used by registered types with the given holder.
    pub fn for_holder(holder: HolderKind) -> Self {
        match holder {
            HolderKind::None => CasterKind::Generic,
            HolderKind::Shared => CasterKind::HolderCopyable,
            HolderKind::Unique => CasterKind::HolderMoveOnly,
        }
    }
}
