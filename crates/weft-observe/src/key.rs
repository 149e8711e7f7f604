#![forbid(unsafe_code)]

//! Identity newtypes and property keys for the dependency registry.
//!
//! Every dependency edge in the engine is addressed by an `(OwnerId, PropKey)`
//! pair: owners are containers, property keys name the slot that was read or
//! written, or one of the sentinel keys that stand in for whole-shape access.

use std::fmt;
use std::rc::Rc;

use crate::value::Raw;

// ---------------------------------------------------------------------------
// Identity newtypes
// ---------------------------------------------------------------------------

/// Identity of an observed container in the dependency registry.
///
/// Allocated once per container (in-place model) or once per companion slot
/// (wrap-around model), and never handed to a second live container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl OwnerId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric value, for logging and diagnostics.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Identity of a registered observer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl ObserverId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Property keys
// ---------------------------------------------------------------------------

/// A property key inside one owner.
///
/// Three sentinel keys carry shape-level semantics:
///
/// - [`PropKey::Length`] stands for the size of a container. Reads of a
///   sequence's length subscribe here, and every length-changing or
///   order-changing sequence mutation notifies here exactly once.
/// - [`PropKey::AnyKey`] stands for the key set of an associative container.
///   Iteration subscribes here; inserts and updates notify here.
/// - [`PropKey::DateStamp`] is the single mutation channel of a date value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// Named record field.
    Field(Rc<str>),
    /// Sequence position.
    Index(usize),
    /// Map or set entry, addressed by the key value itself.
    Entry(Raw),
    /// Size sentinel.
    Length,
    /// Key-set sentinel for maps and sets.
    AnyKey,
    /// Mutation sentinel for dates.
    DateStamp,
}

impl PropKey {
    #[must_use]
    pub fn field(name: impl Into<Rc<str>>) -> Self {
        Self::Field(name.into())
    }

    #[must_use]
    pub const fn index(index: usize) -> Self {
        Self::Index(index)
    }

    #[must_use]
    pub fn entry(key: Raw) -> Self {
        Self::Entry(key)
    }

    /// True for the shape-level sentinels, false for concrete slots.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Length | Self::AnyKey | Self::DateStamp)
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Entry(key) => write!(f, "{{{key:?}}}"),
            Self::Length => f.write_str("<length>"),
            Self::AnyKey => f.write_str("<any-key>"),
            Self::DateStamp => f.write_str("<date>"),
        }
    }
}
