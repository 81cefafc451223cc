//! The time coordinator: owns one participant's dependency set and decides when that
//! participant may enter execution mode or be granted a requested time.
//!
//! Two coordinator kinds share the same dependency bookkeeping (`TimeDependencies`):
//! - A **federate coordinator** computes its own grant from its dependencies and is driven by
//!   the federate's own `timeRequest`/`enterExecutingMode` calls.
//! - A **forwarding coordinator** (used by brokers and cores for federates they do not own) only
//!   relays: it aggregates its dependents' requests into one upstream request and fans the
//!   resulting grant back out. `CoordinatorKind` selects which behavior `check_time_grant`
//!   follows; the dependency bookkeeping itself is identical.

use cosim_core::{GlobalFederateId, Time};

use crate::sched::dependency::{DependencyInfo, TimeDependencies, TimeState};
use crate::{ActionCode, ActionFlags, ActionMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorKind {
    Federate,
    Forwarding,
}

/// Outcome of feeding a message or a local request into the coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorOutput {
    /// Commands to broadcast to every current dependent (an `EXEC_GRANT`/`TIME_GRANT`, or a
    /// relayed `EXEC_REQUEST`/`TIME_REQUEST` for a forwarding coordinator).
    pub to_dependents: Vec<ActionMessage>,
    /// A single command to forward to the parent (forwarding coordinators only).
    pub to_parent: Option<ActionMessage>,
}

impl CoordinatorOutput {
    fn grant(msg: ActionMessage) -> Self {
        Self {
            to_dependents: vec![msg],
            to_parent: None,
        }
    }

    fn none() -> Self {
        Self::default()
    }
}

pub struct TimeCoordinator {
    pub id: GlobalFederateId,
    pub kind: CoordinatorKind,
    dependencies: TimeDependencies,
    dependents: Vec<GlobalFederateId>,
    own_state: TimeState,
    requested_time: Time,
    granted_time: Time,
    te: Time,
    tdemin: Time,
    iterating: bool,
    iteration: u16,
    max_iteration_count: u16,
}

impl TimeCoordinator {
    pub fn new(id: GlobalFederateId, kind: CoordinatorKind) -> Self {
        Self {
            id,
            kind,
            dependencies: TimeDependencies::new(),
            dependents: Vec::new(),
            own_state: TimeState::Initialized,
            requested_time: Time::ZERO,
            granted_time: Time::ZERO,
            te: Time::ZERO,
            tdemin: Time::ZERO,
            iterating: false,
            iteration: 0,
            max_iteration_count: 1,
        }
    }

    pub fn set_max_iteration_count(&mut self, max: u16) {
        self.max_iteration_count = max.max(1);
    }

    pub fn add_dependency(&mut self, fed: GlobalFederateId) -> bool {
        self.dependencies.add_dependency(fed)
    }

    pub fn remove_dependency(&mut self, fed: GlobalFederateId) {
        self.dependencies.remove_dependency(fed);
    }

    pub fn add_dependent(&mut self, fed: GlobalFederateId) {
        if !self.dependents.contains(&fed) {
            self.dependents.push(fed);
        }
    }

    pub fn remove_dependent(&mut self, fed: GlobalFederateId) {
        self.dependents.retain(|d| *d != fed);
    }

    pub fn dependents(&self) -> &[GlobalFederateId] {
        &self.dependents
    }

    pub fn dependency(&self, fed: GlobalFederateId) -> Option<&DependencyInfo> {
        self.dependencies.get(fed)
    }

    pub fn granted_time(&self) -> Time {
        self.granted_time
    }

    /// A broker with exactly one dependent and no filters on its path can be removed from the
    /// time graph -- it forwards everything it would otherwise compute. This never changes grant
    /// *values*, only who talks to whom, so it is purely a routing-table optimization performed
    /// by the caller once this returns `true`.
    pub fn eligible_for_simplification(&self, has_filters: bool) -> bool {
        self.kind == CoordinatorKind::Forwarding && self.dependents.len() == 1 && !has_filters
    }

    /// Applies an incoming command from one of this coordinator's dependencies, then checks
    /// whether the update unblocks a pending exec or time grant.
    pub fn process_message(&mut self, m: &ActionMessage) -> CoordinatorOutput {
        if m.is_dependency() {
            self.apply_dependency_command(m);
            return CoordinatorOutput::none();
        }
        let changed = self.dependencies.update_time(m);
        if !changed {
            return CoordinatorOutput::none();
        }
        match self.own_state {
            TimeState::ExecRequested | TimeState::ExecRequestedIterative => {
                self.check_exec_grant()
            }
            TimeState::TimeRequested | TimeState::TimeRequestedIterative => self.check_time_grant(),
            _ => CoordinatorOutput::none(),
        }
    }

    fn apply_dependency_command(&mut self, m: &ActionMessage) {
        match m.action {
            ActionCode::AddDependency => {
                self.add_dependency(m.source_id);
            }
            ActionCode::RemoveDependency => {
                self.remove_dependency(m.source_id);
            }
            ActionCode::AddDependent => {
                self.add_dependent(m.source_id);
            }
            ActionCode::RemoveDependent => {
                self.remove_dependent(m.source_id);
            }
            ActionCode::AddInterdependency => {
                self.add_dependency(m.source_id);
                self.add_dependent(m.source_id);
            }
            ActionCode::RemoveInterdependency => {
                self.remove_dependency(m.source_id);
                self.remove_dependent(m.source_id);
            }
            _ => {}
        }
    }

    /// Begins (or re-asserts) a request to enter execution mode.
    pub fn enter_exec_request(&mut self, iterating: bool) -> CoordinatorOutput {
        self.own_state = if iterating {
            TimeState::ExecRequestedIterative
        } else {
            TimeState::ExecRequested
        };
        self.iterating = iterating;
        self.check_exec_grant()
    }

    fn check_exec_grant(&mut self) -> CoordinatorOutput {
        if !self.dependencies.check_if_ready_for_exec_entry(self.iterating) {
            return CoordinatorOutput::none();
        }
        if self.iterating {
            self.iteration += 1;
            if self.iteration < self.max_iteration_count
                && self
                    .dependencies
                    .iter()
                    .any(|d| d.time_state == TimeState::ExecRequestedIterative)
            {
                // Still converging: hand back a non-final grant so every waiting caller unblocks
                // and can re-assert its request for the next round, rather than leaving them
                // parked on a grant that will never come.
                self.dependencies.reset_iterating_exec_requests();
                let grant = ActionMessage::new(ActionCode::ExecGrant).with_source(self.id, 0usize.into());
                return match self.kind {
                    CoordinatorKind::Federate => CoordinatorOutput::grant(grant),
                    CoordinatorKind::Forwarding => CoordinatorOutput {
                        to_dependents: vec![grant],
                        to_parent: None,
                    },
                };
            }
        }
        self.own_state = TimeState::TimeGranted;
        self.granted_time = Time::ZERO;
        self.te = Time::ZERO;
        self.tdemin = Time::ZERO;

        let mut grant = ActionMessage::new(ActionCode::ExecGrant).with_source(self.id, 0usize.into());
        if self.iterating && self.iteration >= self.max_iteration_count {
            grant.flags.set(ActionFlags::PROCESSING_COMPLETE);
        }
        match self.kind {
            CoordinatorKind::Federate => CoordinatorOutput::grant(grant),
            CoordinatorKind::Forwarding => {
                let mut upstream =
                    ActionMessage::new(ActionCode::ExecRequest).with_source(self.id, 0usize.into());
                if self.iterating {
                    upstream.flags.set(ActionFlags::ITERATION_REQUESTED);
                }
                CoordinatorOutput {
                    to_dependents: vec![grant.clone()],
                    to_parent: Some(upstream),
                }
            }
        }
    }

    /// Requests advance to `time`, with `te` as this participant's own next scheduled event.
    pub fn time_request(&mut self, time: Time, te: Time, iterating: bool) -> CoordinatorOutput {
        self.own_state = if iterating {
            TimeState::TimeRequestedIterative
        } else {
            TimeState::TimeRequested
        };
        self.requested_time = time;
        self.te = te;
        self.tdemin = te;
        self.iterating = iterating;
        self.check_time_grant()
    }

    fn check_time_grant(&mut self) -> CoordinatorOutput {
        if !self
            .dependencies
            .check_if_ready_for_time_grant(self.iterating, self.requested_time)
        {
            return CoordinatorOutput::none();
        }
        self.own_state = TimeState::TimeGranted;
        self.granted_time = self.requested_time;
        let dependency_te_min = self
            .dependencies
            .iter()
            .map(|d| d.te)
            .min()
            .unwrap_or(Time::MAX_TIME);
        let dependency_tdemin = self
            .dependencies
            .iter()
            .map(|d| d.tdemin)
            .min()
            .unwrap_or(Time::MAX_TIME);
        self.te = self.te.min(dependency_te_min);
        self.tdemin = self.tdemin.min(dependency_tdemin);

        let grant = ActionMessage::new(ActionCode::TimeGrant)
            .with_source(self.id, 0usize.into())
            .with_time(self.granted_time);
        let mut grant = grant;
        grant.te = self.te;
        grant.tdemin = self.tdemin;

        match self.kind {
            CoordinatorKind::Federate => CoordinatorOutput::grant(grant),
            CoordinatorKind::Forwarding => {
                let mut upstream =
                    ActionMessage::new(ActionCode::TimeRequest).with_source(self.id, 0usize.into());
                upstream.action_time = self.requested_time;
                upstream.te = self.te;
                upstream.tdemin = self.tdemin;
                if self.iterating {
                    upstream.flags.set(ActionFlags::ITERATION_REQUESTED);
                }
                CoordinatorOutput {
                    to_dependents: vec![grant],
                    to_parent: Some(upstream),
                }
            }
        }
    }

    /// Marks `fed` as disconnected. If this unblocks a pending grant, returns it.
    pub fn disconnect_dependency(&mut self, fed: GlobalFederateId) -> CoordinatorOutput {
        if let Some(dep) = self.dependencies.get_mut(fed) {
            dep.disconnect();
        }
        match self.own_state {
            TimeState::ExecRequested | TimeState::ExecRequestedIterative => self.check_exec_grant(),
            TimeState::TimeRequested | TimeState::TimeRequestedIterative => self.check_time_grant(),
            _ => CoordinatorOutput::none(),
        }
    }

    pub fn has_active_time_dependencies(&self) -> bool {
        self.dependencies.has_active_time_dependencies()
    }

    /// Whether this coordinator currently has an exec-entry request outstanding -- used by a
    /// forwarding coordinator's owner to decide whether a newly arrived dependent request should
    /// kick off a fresh request of its own or just feed an already-pending one.
    pub fn is_awaiting_exec_grant(&self) -> bool {
        matches!(
            self.own_state,
            TimeState::ExecRequested | TimeState::ExecRequestedIterative
        )
    }

    /// Whether this coordinator currently has a time advance request outstanding.
    pub fn is_awaiting_time_grant(&self) -> bool {
        matches!(
            self.own_state,
            TimeState::TimeRequested | TimeState::TimeRequestedIterative
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fed(n: i32) -> GlobalFederateId {
        GlobalFederateId::from(n)
    }

    #[test]
    fn federate_grants_exec_once_all_dependencies_request() {
        let mut c = TimeCoordinator::new(fed(1), CoordinatorKind::Federate);
        c.add_dependency(fed(2));
        let out = c.enter_exec_request(false);
        assert!(out.to_dependents.is_empty());

        let req = ActionMessage::new(ActionCode::ExecRequest).with_source(fed(2), 0usize.into());
        let out = c.process_message(&req);
        assert_eq!(out.to_dependents.len(), 1);
        assert_eq!(out.to_dependents[0].action, ActionCode::ExecGrant);
    }

    #[test]
    fn time_grant_waits_for_dependency_tnext() {
        let mut c = TimeCoordinator::new(fed(1), CoordinatorKind::Federate);
        c.add_dependency(fed(2));
        let out = c.time_request(Time::from_seconds(1.0), Time::from_seconds(1.0), false);
        assert!(out.to_dependents.is_empty());

        // A dependency granted exactly the requested instant may still emit there, so the grant
        // must keep waiting.
        let mut grant_at_desired =
            ActionMessage::new(ActionCode::TimeGrant).with_source(fed(2), 0usize.into());
        grant_at_desired.action_time = Time::from_seconds(1.0);
        let out = c.process_message(&grant_at_desired);
        assert!(out.to_dependents.is_empty());
        assert!(c.is_awaiting_time_grant());

        // Once it advances past the requested instant, the grant releases.
        let mut grant_past_desired =
            ActionMessage::new(ActionCode::TimeGrant).with_source(fed(2), 0usize.into());
        grant_past_desired.action_time = Time::from_seconds(1.5);
        let out = c.process_message(&grant_past_desired);
        assert_eq!(out.to_dependents.len(), 1);
        assert_eq!(c.granted_time(), Time::from_seconds(1.0));
    }

    #[test]
    fn disconnect_unblocks_pending_grant() {
        let mut c = TimeCoordinator::new(fed(1), CoordinatorKind::Federate);
        c.add_dependency(fed(2));
        c.time_request(Time::from_seconds(5.0), Time::from_seconds(5.0), false);
        let out = c.disconnect_dependency(fed(2));
        assert_eq!(out.to_dependents.len(), 1);
        assert_eq!(c.granted_time(), Time::from_seconds(5.0));
    }

    #[test]
    fn forwarding_coordinator_relays_upstream() {
        let mut c = TimeCoordinator::new(fed(9), CoordinatorKind::Forwarding);
        c.add_dependency(fed(2));
        c.add_dependent(fed(3));
        c.time_request(Time::from_seconds(2.0), Time::from_seconds(2.0), false);
        let mut grant = ActionMessage::new(ActionCode::TimeGrant).with_source(fed(2), 0usize.into());
        grant.action_time = Time::from_seconds(3.0);
        let out = c.process_message(&grant);
        assert!(out.to_parent.is_some());
        assert_eq!(out.to_parent.unwrap().action, ActionCode::TimeRequest);
    }
}
