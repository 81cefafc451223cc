//! Filter pipeline: ordered source-filter chains, destination filters, and the fixed-slot
//! "airlock" used to publish a filter's callable across the API/processing boundary without a
//! lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cosim_core::{GlobalHandle, InterfaceHandle, Time};

/// A user-supplied message transform. Cloning filters fork a copy per delivery target and leave
/// the original untouched; non-cloning filters replace the message in place, and a `None`
/// return drops it.
pub trait FilterOperator: Send + Sync {
    fn process(&self, payload: &[u8]) -> Option<Vec<u8>>;
}

impl<F> FilterOperator for F
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    fn process(&self, payload: &[u8]) -> Option<Vec<u8>> {
        (self)(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPlacement {
    Source,
    Destination,
}

/// Metadata for one registered filter, independent of its endpoint ordering.
#[derive(Clone)]
pub struct FilterInfo {
    pub handle: InterfaceHandle,
    pub placement: FilterPlacement,
    pub cloning: bool,
    pub input_type: String,
    pub output_type: String,
    /// For cloning filters: every endpoint a forked copy should be delivered to.
    pub delivery_endpoints: Vec<GlobalHandle>,
    /// Added delay a destination filter imposes before the message is considered delivered.
    pub delay: Time,
}

impl FilterInfo {
    pub fn new(handle: InterfaceHandle, placement: FilterPlacement, cloning: bool) -> Self {
        Self {
            handle,
            placement,
            cloning,
            input_type: String::new(),
            output_type: String::new(),
            delivery_endpoints: Vec::new(),
            delay: Time::ZERO,
        }
    }
}

/// Orders an endpoint's source-filter chain: cloning filters run first (order preserved among
/// themselves), then non-cloning filters are chained by type compatibility, starting from the
/// endpoint's own declared type. A filter whose declared input type does not match the running
/// type is left in its insertion-order position and still executes -- callers should log a
/// warning when that happens, which `organize_filter_operations` reports via its return value.
pub fn organize_filter_operations(
    filters: &mut [FilterInfo],
    endpoint_type: &str,
) -> Vec<InterfaceHandle> {
    filters.sort_by_key(|f| !f.cloning);

    let mut mismatched = Vec::new();
    let mut running_type = endpoint_type.to_string();
    let mut seen_non_cloning = false;
    for f in filters.iter() {
        if f.cloning {
            continue;
        }
        if seen_non_cloning && !f.input_type.is_empty() && f.input_type != running_type {
            mismatched.push(f.handle);
        }
        if !f.output_type.is_empty() {
            running_type = f.output_type.clone();
        }
        seen_non_cloning = true;
    }
    mismatched
}

/// Checks the "at most one non-cloning destination filter" invariant for an endpoint's
/// destination-side chain.
pub fn validate_destination_chain(filters: &[FilterInfo]) -> Result<(), &'static str> {
    let non_cloning = filters
        .iter()
        .filter(|f| f.placement == FilterPlacement::Destination && !f.cloning)
        .count();
    if non_cloning > 1 {
        Err("an endpoint may have at most one non-cloning destination filter")
    } else {
        Ok(())
    }
}

/// A fixed-slot handoff for publishing non-POD callbacks (filter operators, logger callbacks)
/// from an API-thread caller into the single processing task without holding a lock across user
/// code. The processing task drains slots during its next dispatch pass; the bound of four slots
/// matches the reference implementation's rationale that this is enough room for callbacks
/// queued between two dispatch passes.
pub struct Airlock<T> {
    slots: [Mutex<Option<T>>; 4],
    next: AtomicUsize,
}

impl<T> Default for Airlock<T> {
    fn default() -> Self {
        Self {
            slots: [
                Mutex::new(None),
                Mutex::new(None),
                Mutex::new(None),
                Mutex::new(None),
            ],
            next: AtomicUsize::new(0),
        }
    }
}

impl<T> Airlock<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` in the next slot (round-robin) and returns that slot's index, to be
    /// carried in the configuration command that tells the processing task where to look.
    pub fn publish(&self, value: T) -> usize {
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.slots.len();
        *self.slots[index].lock().unwrap() = Some(value);
        index
    }

    /// Takes the value out of `index`, leaving the slot empty for reuse.
    pub fn take(&self, index: usize) -> Option<T> {
        self.slots[index].lock().unwrap().take()
    }
}

pub type FilterOperatorAirlock = Arc<Airlock<Box<dyn FilterOperator>>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloning_filters_sort_before_non_cloning() {
        let mut filters = vec![
            FilterInfo::new(InterfaceHandle::from(0usize), FilterPlacement::Source, false),
            FilterInfo::new(InterfaceHandle::from(1usize), FilterPlacement::Source, true),
        ];
        organize_filter_operations(&mut filters, "double");
        assert!(filters[0].cloning);
        assert!(!filters[1].cloning);
    }

    #[test]
    fn destination_chain_rejects_two_non_cloning() {
        let filters = vec![
            FilterInfo::new(InterfaceHandle::from(0usize), FilterPlacement::Destination, false),
            FilterInfo::new(InterfaceHandle::from(1usize), FilterPlacement::Destination, false),
        ];
        assert!(validate_destination_chain(&filters).is_err());
    }

    #[test]
    fn airlock_round_trips() {
        let airlock: Airlock<i32> = Airlock::new();
        let idx = airlock.publish(42);
        assert_eq!(airlock.take(idx), Some(42));
        assert_eq!(airlock.take(idx), None);
    }
}
