//! Routing primitives shared by [`crate::broker::Broker`] and [`crate::core::Core`]: mapping a
//! known global id or interface name to the local route that leads towards it, and correlating a
//! forwarded request with the route it should come back down on.
//!
//! Grounded on the reference implementation's `CoreBroker::routing_table` /
//! `knownExternalEndpoints` (`examples/original_source/src/helics/core/CoreBroker.hpp`): a flat
//! map from global id to outbound route, plus a name index populated as registrations bubble up.

use std::collections::HashMap;

use cosim_core::{GlobalFederateId, RouteId};

/// Maps a known global federate/broker id to the local route leading towards it, plus a by-name
/// index for interfaces whose owner has announced itself but not yet been addressed directly.
#[derive(Debug, Default)]
pub struct RoutingTable {
    by_global_id: HashMap<GlobalFederateId, RouteId>,
    known_names: HashMap<(cosim_runtime::HandleKind, String), cosim_core::GlobalHandle>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_route(&mut self, id: GlobalFederateId, route: RouteId) {
        self.by_global_id.insert(id, route);
    }

    pub fn route_for(&self, id: GlobalFederateId) -> Option<RouteId> {
        self.by_global_id.get(&id).copied()
    }

    pub fn remove(&mut self, id: GlobalFederateId) {
        self.by_global_id.remove(&id);
    }

    pub fn learn_name(
        &mut self,
        kind: cosim_runtime::HandleKind,
        name: impl Into<String>,
        global: cosim_core::GlobalHandle,
    ) {
        self.known_names.insert((kind, name.into()), global);
    }

    pub fn resolve_name(
        &self,
        kind: cosim_runtime::HandleKind,
        name: &str,
    ) -> Option<cosim_core::GlobalHandle> {
        self.known_names.get(&(kind, name.to_string())).copied()
    }
}

/// Decides which route a command addressed to `dest` should go out on. An unset destination, the
/// `PARENT` sentinel, or an id this participant has no child route for all resolve to `PARENT` --
/// §4.3's routing rule verbatim.
pub fn route_for_destination(
    table: &RoutingTable,
    own_id: GlobalFederateId,
    dest: GlobalFederateId,
) -> RouteId {
    if !dest.is_valid() || dest.is_parent_sentinel() || dest == own_id {
        return RouteId::PARENT;
    }
    table.route_for(dest).unwrap_or(RouteId::PARENT)
}

/// Correlates a request forwarded upstream with whatever local context its eventual reply needs
/// to be routed back to. Each entry is a single-use, monotonically increasing id -- the same
/// technique the reference implementation uses for nested broker registration, generalized here
/// to queries as well so an arbitrarily deep tree never needs global id uniqueness across hops.
#[derive(Debug, Default)]
pub struct CorrelationTable<T> {
    next_id: i64,
    pending: HashMap<i64, T>,
}

impl<T> CorrelationTable<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocates a fresh correlation id for `value` and returns it, to be stamped as the outgoing
    /// request's `message_id`.
    pub fn begin(&mut self, value: T) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, value);
        id
    }

    /// Resolves and removes the entry for `id`, if one is outstanding.
    pub fn resolve(&mut self, id: i64) -> Option<T> {
        self.pending.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_for_destination_falls_back_to_parent() {
        let table = RoutingTable::new();
        let own = GlobalFederateId::new_broker(0);
        assert_eq!(
            route_for_destination(&table, own, GlobalFederateId::INVALID),
            RouteId::PARENT
        );
        assert_eq!(
            route_for_destination(&table, own, GlobalFederateId::from(99)),
            RouteId::PARENT
        );
    }

    #[test]
    fn route_for_destination_uses_learned_route() {
        let mut table = RoutingTable::new();
        let own = GlobalFederateId::new_broker(0);
        let child = GlobalFederateId::new_broker(1);
        table.set_route(child, RouteId::from(1usize));
        assert_eq!(
            route_for_destination(&table, own, child),
            RouteId::from(1usize)
        );
    }

    #[test]
    fn correlation_ids_are_single_use() {
        let mut table: CorrelationTable<RouteId> = CorrelationTable::new();
        let id = table.begin(RouteId::from(2usize));
        assert_eq!(table.resolve(id), Some(RouteId::from(2usize)));
        assert_eq!(table.resolve(id), None);
    }
}
