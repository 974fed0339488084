//! Unified error type for the binding layer.
//!
//! Every fallible operation in the workspace returns [`BindError`]. Errors fall
//! into three categories, reported by [`ErrorKind::category`]:
//!
//! ```text
//! Usage          - the caller passed a value of the wrong shape
//! Configuration  - a type was registered in a way that cannot satisfy the request
//! Internal       - an invariant of the binding layer itself was violated
//! ```
//!
//! `load` failures that simply mean "this value is not of that type" are not
//! errors at all: the caster returns `false` so overload resolution can try the
//! next candidate. Everything reported here is raised to the caller.
//!
//! Messages always carry the cleaned native type name. Host-side type names are
//! only included in debug builds (see [`host_detail`]); the error kind stays
//! distinguishable either way.

use thiserror::Error;

/// Errors raised across the native/host boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    // ------------------------------------------------------------------
    // Usage errors
    // ------------------------------------------------------------------
    /// A host value could not be loaded as the requested native type.
    #[error("expected type {expected}, got type {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// An integer was out of range for the target native integer type.
    #[error("integer overflow: {value} does not fit in {target_type}")]
    IntegerOverflow {
        value: i64,
        target_type: &'static str,
    },

    /// A host type inherits from more than one registered native type where
    /// only single inheritance is supported.
    #[error("type {host_type} has multiple registered native bases")]
    AmbiguousBases { host_type: String },

    /// A unique-ownership load found other live references to the source.
    #[error("non-unique reference, cannot cast to unique holder of {type_name}: {count} references")]
    NonUniqueReference { type_name: String, count: usize },

    /// A unique-ownership load was given something other than a move container.
    #[error(
        "only a single-item list or an object exposing `peek` and `release` can be moved into a unique holder of {type_name}"
    )]
    UnsupportedMoveContainer { type_name: String },

    /// A null native value was loaded where a reference was required.
    #[error("unable to load none as a reference to {type_name}")]
    ReferenceCast { type_name: String },

    /// A wrapper was used before its native value was constructed.
    #[error("{type_name} instance is not initialized")]
    NotInitialized { type_name: String },

    /// A host attribute lookup failed.
    #[error("{object} has no attribute '{name}'")]
    AttributeError { object: String, name: String },

    /// A host object was called but is not callable.
    #[error("{type_name} object is not callable")]
    NotCallable { type_name: String },

    /// A call received the wrong number of arguments.
    #[error("argument index {index} out of bounds (call has {count} arguments)")]
    ArgumentIndexOutOfBounds { index: usize, count: usize },

    /// No overload accepted the supplied arguments.
    #[error("incompatible function arguments for {function}")]
    NoMatchingOverload { function: String },

    /// An error raised by host code (the analogue of a host exception).
    #[error("{0}")]
    Raised(String),

    // ------------------------------------------------------------------
    // Configuration errors
    // ------------------------------------------------------------------
    /// The native identity is already registered in this scope.
    #[error("type {type_name} is already registered")]
    AlreadyRegistered { type_name: String },

    /// A wrapper was allocated for a host type with no registered native root.
    #[error("instance allocation failed: {host_type} has no registered native base types")]
    NoRegisteredBase { host_type: String },

    /// A native type has no descriptor in any visible scope.
    #[error("unregistered type: {type_name}")]
    Unregistered { type_name: String },

    /// A Copy policy cast was requested for a type without a copy constructor.
    #[error("return policy is copy, but {type_name} is not copyable")]
    NotCopyable { type_name: String },

    /// A Move policy cast was requested for a type with neither constructor.
    #[error("return policy is move, but {type_name} is neither movable nor copyable")]
    NotMovableOrCopyable { type_name: String },

    /// A holder load found a bare (non-held) value.
    #[error("unable to cast from non-held to held instance of {type_name}")]
    NotHeld { type_name: String },

    /// The type was never configured to release ownership to native code.
    #[error("{type_name} has no release mechanism")]
    NoReleaseMechanism { type_name: String },

    /// The requested holder kind does not match the type's registered holder.
    #[error("holder mismatch for {type_name}: {detail}")]
    HolderMismatch { type_name: String, detail: String },

    /// A pure virtual method was called without a host override.
    #[error("tried to call pure virtual function {type_name}::{method}")]
    PureVirtualNotOverridden { type_name: String, method: String },

    // ------------------------------------------------------------------
    // Internal invariant violations
    // ------------------------------------------------------------------
    /// A temporary needed a patient frame but no bound call is active.
    #[error(
        "no active call frame: cannot perform host to native conversions which require temporary values outside a bound call"
    )]
    NoActiveFrame,

    /// The reclaim path was entered without the holder it requires.
    #[error("internal error: reclaiming {type_name} requires an existing holder")]
    MissingHolder { type_name: String },

    /// A registered wrapper's ownership state contradicts the requested transfer.
    #[error("internal error: inconsistent ownership state for registered {type_name}")]
    InconsistentOwnership { type_name: String },

    /// Out-of-line instance layout could not be allocated.
    #[error("instance layout allocation of {bytes} bytes failed")]
    LayoutAllocation { bytes: usize },

    /// The process-wide binding state has been torn down.
    #[error("binding internals used after shutdown")]
    Finalized,
}

/// Discriminant of a [`BindError`], for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TypeMismatch,
    IntegerOverflow,
    AmbiguousBases,
    NonUniqueReference,
    UnsupportedMoveContainer,
    ReferenceCast,
    NotInitialized,
    AttributeError,
    NotCallable,
    ArgumentIndexOutOfBounds,
    NoMatchingOverload,
    Raised,
    AlreadyRegistered,
    NoRegisteredBase,
    Unregistered,
    NotCopyable,
    NotMovableOrCopyable,
    NotHeld,
    NoReleaseMechanism,
    HolderMismatch,
    PureVirtualNotOverridden,
    NoActiveFrame,
    MissingHolder,
    InconsistentOwnership,
    LayoutAllocation,
    Finalized,
}

/// Coarse classification of an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Recoverable, caused by the arguments of a call.
    Usage,
    /// A registration bug surfaced at the point of use.
    Configuration,
    /// Fatal: the binding layer's own invariants are broken.
    Internal,
}

impl ErrorKind {
    /// Get the category of this error kind.
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::TypeMismatch
            | ErrorKind::IntegerOverflow
            | ErrorKind::AmbiguousBases
            | ErrorKind::NonUniqueReference
            | ErrorKind::UnsupportedMoveContainer
            | ErrorKind::ReferenceCast
            | ErrorKind::NotInitialized
            | ErrorKind::AttributeError
            | ErrorKind::NotCallable
            | ErrorKind::ArgumentIndexOutOfBounds
            | ErrorKind::NoMatchingOverload
            | ErrorKind::Raised => ErrorCategory::Usage,
            ErrorKind::AlreadyRegistered
            | ErrorKind::NoRegisteredBase
            | ErrorKind::Unregistered
            | ErrorKind::NotCopyable
            | ErrorKind::NotMovableOrCopyable
            | ErrorKind::NotHeld
            | ErrorKind::NoReleaseMechanism
            | ErrorKind::HolderMismatch
            | ErrorKind::PureVirtualNotOverridden => ErrorCategory::Configuration,
            ErrorKind::NoActiveFrame
            | ErrorKind::MissingHolder
            | ErrorKind::InconsistentOwnership
            | ErrorKind::LayoutAllocation
            | ErrorKind::Finalized => ErrorCategory::Internal,
        }
    }
}

impl BindError {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            BindError::IntegerOverflow { .. } => ErrorKind::IntegerOverflow,
            BindError::AmbiguousBases { .. } => ErrorKind::AmbiguousBases,
            BindError::NonUniqueReference { .. } => ErrorKind::NonUniqueReference,
            BindError::UnsupportedMoveContainer { .. } => ErrorKind::UnsupportedMoveContainer,
            BindError::ReferenceCast { .. } => ErrorKind::ReferenceCast,
            BindError::NotInitialized { .. } => ErrorKind::NotInitialized,
            BindError::AttributeError { .. } => ErrorKind::AttributeError,
            BindError::NotCallable { .. } => ErrorKind::NotCallable,
            BindError::ArgumentIndexOutOfBounds { .. } => ErrorKind::ArgumentIndexOutOfBounds,
            BindError::NoMatchingOverload { .. } => ErrorKind::NoMatchingOverload,
            BindError::Raised(_) => ErrorKind::Raised,
            BindError::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            BindError::NoRegisteredBase { .. } => ErrorKind::NoRegisteredBase,
            BindError::Unregistered { .. } => ErrorKind::Unregistered,
            BindError::NotCopyable { .. } => ErrorKind::NotCopyable,
            BindError::NotMovableOrCopyable { .. } => ErrorKind::NotMovableOrCopyable,
            BindError::NotHeld { .. } => ErrorKind::NotHeld,
            BindError::NoReleaseMechanism { .. } => ErrorKind::NoReleaseMechanism,
            BindError::HolderMismatch { .. } => ErrorKind::HolderMismatch,
            BindError::PureVirtualNotOverridden { .. } => ErrorKind::PureVirtualNotOverridden,
            BindError::NoActiveFrame => ErrorKind::NoActiveFrame,
            BindError::MissingHolder { .. } => ErrorKind::MissingHolder,
            BindError::InconsistentOwnership { .. } => ErrorKind::InconsistentOwnership,
            BindError::LayoutAllocation { .. } => ErrorKind::LayoutAllocation,
            BindError::Finalized => ErrorKind::Finalized,
        }
    }

    /// Returns true for fatal invariant violations.
    pub fn is_internal(&self) -> bool {
        self.kind().category() == ErrorCategory::Internal
    }

    /// Returns true if this error only means "wrong type, try another overload".
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TypeMismatch
                | ErrorKind::IntegerOverflow
                | ErrorKind::ReferenceCast
                | ErrorKind::UnsupportedMoveContainer
        )
    }

    /// Shorthand for a [`BindError::TypeMismatch`] with a debug-only host name.
    pub fn mismatch(expected: impl Into<String>, actual: &str) -> Self {
        BindError::TypeMismatch {
            expected: expected.into(),
            actual: host_detail(actual),
        }
    }
}

/// Host-side type names are only reported in debug builds.
pub fn host_detail(name: &str) -> String {
    if cfg!(debug_assertions) {
        name.to_string()
    } else {
        "<compile in debug mode for details>".to_string()
    }
}

/// Result alias used throughout the workspace.
pub type BindResult<T> = Result<T, BindError>;
