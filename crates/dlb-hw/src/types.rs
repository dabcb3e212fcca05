//! Type-safe resource id wrappers.
//!
//! Every hardware object class has its own id namespace starting at 0.
//! Wrapping the raw index in a kind-tagged type keeps a port id from being
//! handed to a queue register by mistake.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Marker trait for DLB resource kinds.
pub trait ResourceKind: Copy + Send + Sync + 'static {
    /// Returns the kind name used in logs.
    fn type_name() -> &'static str;
}

/// A type-safe hardware resource id.
///
/// # Examples
///
/// ```
/// use dlb_hw::{LdbPortId, LdbQueueId};
///
/// let port = LdbPortId::new(3);
/// let queue = LdbQueueId::new(3);
/// assert_eq!(port.as_raw(), queue.as_raw());
///
/// // This would fail to compile:
/// // fn takes_port(p: LdbPortId) {}
/// // takes_port(queue);
/// ```
#[derive(Clone, Copy)]
pub struct ResourceId<T: ResourceKind> {
    raw: u32,
    _marker: PhantomData<T>,
}

impl<T: ResourceKind> ResourceId<T> {
    /// Creates an id from its raw index.
    pub const fn new(raw: u32) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the raw index.
    pub const fn as_raw(&self) -> u32 {
        self.raw
    }

    /// Returns the raw index as an arena position.
    pub const fn index(&self) -> usize {
        self.raw as usize
    }
}

impl<T: ResourceKind> fmt::Debug for ResourceId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::type_name(), self.raw)
    }
}

impl<T: ResourceKind> fmt::Display for ResourceId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", T::type_name(), self.raw)
    }
}

impl<T: ResourceKind> PartialEq for ResourceId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: ResourceKind> Eq for ResourceId<T> {}

impl<T: ResourceKind> PartialOrd for ResourceId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ResourceKind> Ord for ResourceId<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: ResourceKind> Hash for ResourceId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: ResourceKind> From<ResourceId<T>> for u32 {
    fn from(id: ResourceId<T>) -> u32 {
        id.raw
    }
}

// ============================================================================
// Resource Kind Markers
// ============================================================================

macro_rules! define_resource_kind {
    ($name:ident, $type_name:literal, $id_alias:ident) => {
        #[doc = concat!("Marker type for ", $type_name, " resources.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl ResourceKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("Type-safe ", $type_name, " id.")]
        pub type $id_alias = ResourceId<$name>;
    };
}

define_resource_kind!(DomainKind, "domain", DomainId);
define_resource_kind!(LdbQueueKind, "ldb queue", LdbQueueId);
define_resource_kind!(LdbPortKind, "ldb port", LdbPortId);
define_resource_kind!(DirPortKind, "dir port", DirPortId);
define_resource_kind!(LdbPoolKind, "ldb pool", LdbPoolId);
define_resource_kind!(DirPoolKind, "dir pool", DirPoolId);
define_resource_kind!(SnGroupKind, "sn group", SnGroupId);
