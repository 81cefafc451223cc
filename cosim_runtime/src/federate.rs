//! Per-federate state as tracked by its hosting Core: lifecycle, pending command queue, value
//! and message buffers, and the federate's own time coordinator.

use std::collections::{HashMap, VecDeque};

use cosim_core::{GlobalFederateId, InterfaceHandle, LocalFederateId, Time};

use crate::sched::{CoordinatorKind, TimeCoordinator};
use crate::ActionMessage;

/// A federate's position in its lifecycle. Progression is strictly monotonic; any reverse
/// transition implies `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederateLifecycle {
    Created,
    Initializing,
    Executing,
    Finished,
    Error,
}

/// The latest value received on an input, with optional history if the federate configured one.
#[derive(Debug, Default, Clone)]
pub struct ValueBuffer {
    pub latest: Option<Vec<u8>>,
    pub history: Option<VecDeque<(Time, Vec<u8>)>>,
}

impl ValueBuffer {
    /// Applies an incoming value, honoring binary-equality change detection when requested.
    ///
    /// Returns `true` if the buffer's `latest` value actually changed.
    pub fn update(&mut self, time: Time, bytes: Vec<u8>, only_update_on_change: bool) -> bool {
        if only_update_on_change {
            if self.latest.as_deref() == Some(bytes.as_slice()) {
                return false;
            }
        }
        if let Some(history) = &mut self.history {
            history.push_back((time, bytes.clone()));
        }
        self.latest = Some(bytes);
        true
    }
}

/// A per-endpoint queue of received messages, each tagged with its delivery time.
#[derive(Debug, Default, Clone)]
pub struct MessageQueue {
    messages: VecDeque<(Time, Vec<u8>)>,
}

impl MessageQueue {
    pub fn push(&mut self, time: Time, bytes: Vec<u8>) {
        self.messages.push_back((time, bytes));
    }

    pub fn pop(&mut self) -> Option<(Time, Vec<u8>)> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Everything a Core tracks about one hosted federate.
pub struct FederateState {
    pub name: String,
    pub local_id: LocalFederateId,
    pub global_id: GlobalFederateId,
    pub lifecycle: FederateLifecycle,
    /// Commands waiting to be dispatched to this federate (mirrors the processing loop's queue,
    /// kept per-federate so a slow federate cannot starve its siblings).
    pub pending: VecDeque<ActionMessage>,
    pub inputs: HashMap<InterfaceHandle, ValueBuffer>,
    pub endpoints: HashMap<InterfaceHandle, MessageQueue>,
    /// Handles that produced output at the current grant -- surfaced to the federate API so it
    /// knows which inputs/endpoints to poll without scanning every one.
    pub updated_handles: Vec<InterfaceHandle>,
    /// The next time this federate is permitted to send on any publication (monotonic per the
    /// FIFO-per-channel invariant).
    pub next_allowed_send_time: Time,
    pub coordinator: TimeCoordinator,
}

impl FederateState {
    pub fn new(name: impl Into<String>, local_id: LocalFederateId) -> Self {
        Self {
            name: name.into(),
            local_id,
            global_id: GlobalFederateId::INVALID,
            lifecycle: FederateLifecycle::Created,
            pending: VecDeque::new(),
            inputs: HashMap::new(),
            endpoints: HashMap::new(),
            updated_handles: Vec::new(),
            next_allowed_send_time: Time::ZERO,
            coordinator: TimeCoordinator::new(GlobalFederateId::INVALID, CoordinatorKind::Federate),
        }
    }

    /// Called once the parent's ack assigns this federate its global id.
    pub fn assign_global_id(&mut self, global_id: GlobalFederateId) {
        self.global_id = global_id;
        self.coordinator = TimeCoordinator::new(global_id, CoordinatorKind::Federate);
    }

    /// Enforces the monotonic lifecycle progression; reverse transitions become `Error` instead
    /// of being silently accepted.
    pub fn transition(&mut self, next: FederateLifecycle) {
        use FederateLifecycle::*;
        let allowed = matches!(
            (self.lifecycle, next),
            (Created, Initializing)
                | (Initializing, Executing)
                | (Executing, Finished)
                | (_, Error)
                | (Finished, Finished)
        );
        self.lifecycle = if allowed { next } else { Error };
    }

    pub fn enqueue(&mut self, m: ActionMessage) {
        self.pending.push_back(m);
    }

    pub fn record_grant(&mut self, updated: Vec<InterfaceHandle>) {
        self.updated_handles = updated;
    }

    pub fn value_buffer(&mut self, handle: InterfaceHandle) -> &mut ValueBuffer {
        self.inputs.entry(handle).or_default()
    }

    pub fn endpoint_queue(&mut self, handle: InterfaceHandle) -> &mut MessageQueue {
        self.endpoints.entry(handle).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_monotonic() {
        let mut fed = FederateState::new("a", LocalFederateId::from(0usize));
        fed.transition(FederateLifecycle::Initializing);
        assert_eq!(fed.lifecycle, FederateLifecycle::Initializing);
        fed.transition(FederateLifecycle::Executing);
        assert_eq!(fed.lifecycle, FederateLifecycle::Executing);
        // Reverse transition becomes Error rather than silently rewinding.
        fed.transition(FederateLifecycle::Created);
        assert_eq!(fed.lifecycle, FederateLifecycle::Error);
    }

    #[test]
    fn change_detection_suppresses_repeats() {
        let mut buf = ValueBuffer::default();
        assert!(buf.update(Time::ZERO, vec![1], true));
        assert!(!buf.update(Time::ZERO, vec![1], true));
        assert!(buf.update(Time::ZERO, vec![2], true));
    }
}
