//! The transport contract a Core or Broker's processing task consumes, independent of how a
//! route is actually carried.
//!
//! A route is addressed by the participant-local [`RouteId`]; route `0` is always `PARENT`. What
//! a route *is* -- an in-process channel today, a TCP socket in some future transport -- is
//! opaque to everything above this crate.

use cosim_core::RouteId;
use cosim_runtime::ActionMessage;
use cosim_tinymap::TinySecondaryMap;

use crate::error::TransportError;

/// Where a route leads. Only the in-process variant is implemented; a future networked transport
/// would add its own variant here without touching `Transport` callers.
#[derive(Clone)]
pub enum RouteInfo {
    Inproc(tokio::sync::mpsc::UnboundedSender<ActionMessage>),
}

/// What a Core or Broker needs from its transport: send on an existing route, and add or remove
/// routes as peers are discovered or disconnect. Delivery *into* a participant is not part of
/// this trait -- it happens by the participant holding the receiving end of whatever channel its
/// [`RouteInfo`] wraps, fed by [`crate::directory::ParticipantDirectory`] at registration time.
pub trait Transport: Send {
    fn add_route(&mut self, route: RouteId, info: RouteInfo);
    fn remove_route(&mut self, route: RouteId);
    fn transmit(&self, route: RouteId, message: ActionMessage) -> Result<(), TransportError>;
}

/// Dense per-participant table of [`RouteInfo`], shared by every [`Transport`] implementation
/// that addresses peers by [`RouteId`].
#[derive(Default)]
pub struct RouteTable {
    routes: TinySecondaryMap<RouteId, RouteInfo>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route: RouteId, info: RouteInfo) {
        self.routes.insert(route, info);
    }

    pub fn remove_route(&mut self, route: RouteId) {
        self.routes.remove(route);
    }

    pub fn get(&self, route: RouteId) -> Option<&RouteInfo> {
        self.routes.get(route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_route_is_a_hole_not_a_panic() {
        let table = RouteTable::new();
        assert!(table.get(RouteId::PARENT).is_none());
    }
}
