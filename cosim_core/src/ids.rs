//! Identifiers used throughout the federation core.
//!
//! [`LocalFederateId`], [`InterfaceHandle`] and [`RouteId`] are dense keys scoped to a single
//! participant (a Core or Broker) and are allocated with [`cosim_tinymap::key_type!`]. A
//! [`GlobalFederateId`] is process-wide and cannot be a dense key: its numeric value encodes
//! whether it names a federate or a broker, so it is a plain newtype instead.

use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

cosim_tinymap::key_type!(
    /// A federate's index within its owning Core's local registry.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub LocalFederateId
);

cosim_tinymap::key_type!(
    /// A handle's index within its owning participant (Core or Broker) -- unique per
    /// publication/input/endpoint/filter registered locally.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub InterfaceHandle
);

cosim_tinymap::key_type!(
    /// An index into a participant's transport route table.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub RouteId
);

impl RouteId {
    /// The reserved route leading towards the participant's parent.
    pub const PARENT: RouteId = RouteId(0);
}

/// A process-wide unique identifier for a federate or a broker.
///
/// The encoding splits the id space into three ranges so that a bare integer value can be
/// classified without a side table:
///
/// - `[0, FEDERATE_ID_SHIFT)` is unused (reserved for future global object kinds).
/// - `[FEDERATE_ID_SHIFT, BROKER_ID_SHIFT)` identifies federates; the low bits are the
///   federate's local index within its hosting Core.
/// - `[BROKER_ID_SHIFT, i32::MAX]` identifies brokers/cores as seen by their parent; the low
///   bits are the child's local index within its parent broker.
///
/// Two sentinels fall outside both ranges: [`GlobalFederateId::INVALID`] (unassigned) and
/// [`GlobalFederateId::PARENT`] (the implicit identity of "my own parent", used before a child
/// has learned its parent's real id during registration).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct GlobalFederateId(i32);

impl GlobalFederateId {
    /// First id value reserved for federates.
    pub const FEDERATE_ID_SHIFT: i32 = 0x0010_0000;
    /// First id value reserved for brokers/cores.
    pub const BROKER_ID_SHIFT: i32 = 0x4000_0000;

    const INVALID_VALUE: i32 = -1;
    const PARENT_VALUE: i32 = -2;

    /// The unassigned/invalid id.
    pub const INVALID: GlobalFederateId = GlobalFederateId(Self::INVALID_VALUE);
    /// Stands in for "my parent" before the parent's real id is known.
    pub const PARENT: GlobalFederateId = GlobalFederateId(Self::PARENT_VALUE);

    pub fn new_federate(local_index: LocalFederateId) -> Self {
        Self(Self::FEDERATE_ID_SHIFT + local_index.index() as i32)
    }

    pub fn new_broker(local_index: usize) -> Self {
        Self(Self::BROKER_ID_SHIFT + local_index as i32)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != Self::INVALID_VALUE
    }

    pub fn is_parent_sentinel(&self) -> bool {
        self.0 == Self::PARENT_VALUE
    }

    pub fn is_federate(&self) -> bool {
        (Self::FEDERATE_ID_SHIFT..Self::BROKER_ID_SHIFT).contains(&self.0)
    }

    pub fn is_broker(&self) -> bool {
        self.0 >= Self::BROKER_ID_SHIFT
    }

    /// This id's local index within its owning participant, if it is a federate or broker id.
    pub fn local_index(&self) -> Option<usize> {
        if self.is_federate() {
            Some((self.0 - Self::FEDERATE_ID_SHIFT) as usize)
        } else if self.is_broker() {
            Some((self.0 - Self::BROKER_ID_SHIFT) as usize)
        } else {
            None
        }
    }

    pub fn raw(&self) -> i32 {
        self.0
    }
}

impl Display for GlobalFederateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_parent_sentinel() {
            write!(f, "parent")
        } else if !self.is_valid() {
            write!(f, "invalid")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i32> for GlobalFederateId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<GlobalFederateId> for i32 {
    fn from(value: GlobalFederateId) -> Self {
        value.0
    }
}

/// A globally-addressable handle: a federate id paired with one of its local interface handles.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalHandle {
    pub federate: GlobalFederateId,
    pub handle: InterfaceHandle,
}

impl GlobalHandle {
    pub fn new(federate: GlobalFederateId, handle: InterfaceHandle) -> Self {
        Self { federate, handle }
    }
}

impl Display for GlobalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.federate, self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn federate_and_broker_ranges_do_not_overlap() {
        let fed = GlobalFederateId::new_federate(LocalFederateId::from(3usize));
        let broker = GlobalFederateId::new_broker(3);
        assert!(fed.is_federate());
        assert!(!fed.is_broker());
        assert!(broker.is_broker());
        assert!(!broker.is_federate());
        assert_eq!(fed.local_index(), Some(3));
        assert_eq!(broker.local_index(), Some(3));
    }

    #[test]
    fn sentinels_are_neither_federate_nor_broker() {
        assert!(!GlobalFederateId::INVALID.is_federate());
        assert!(!GlobalFederateId::INVALID.is_broker());
        assert!(!GlobalFederateId::INVALID.is_valid());
        assert!(GlobalFederateId::PARENT.is_parent_sentinel());
    }

    #[test]
    fn route_parent_is_zero() {
        assert_eq!(RouteId::PARENT.index(), 0);
    }
}
