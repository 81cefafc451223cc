//! The Broker routing/coordination runtime (§4.3): a non-leaf node in the broker tree. A Broker
//! owns no federates of its own -- it resolves global names, forwards everything it cannot
//! resolve locally, and relays the time-coordination handshake between its children and its own
//! parent.
//!
//! Grounded on the same `CommonCore` dispatch-by-action-kind loop as [`crate::core::Core`]; the
//! two processing tasks share `RoutingTable`/`CorrelationTable` (`crate::routing`) and the
//! `TimeCoordinator` forwarding mode (`cosim_runtime::sched`). What differs is what a Broker has
//! instead of [`cosim_runtime::FederateState`]: a table of child brokers/cores rather than
//! federates, and exactly one forwarding [`cosim_runtime::TimeCoordinator`] for the whole subtree
//! beneath it rather than one per hosted federate.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use cosim_core::{GlobalFederateId, GlobalHandle, RouteId};
use cosim_runtime::{
    ActionCode, ActionFlags, ActionMessage, CoordinatorKind, CoordinatorOutput, DelayedQueries,
    HandleKind, MapBuilder, QueryId, TimeCoordinator,
};
use cosim_tinymap::{key_type, TinyMap};
use cosim_transport::{InprocTransport, ParticipantHandle, RouteInfo, Transport, DIRECTORY};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::routing::{route_for_destination, CorrelationTable, RoutingTable};

key_type!(
    /// A child broker or core's index within its parent's local registry.
    pub ChildId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Core,
    Broker,
}

struct ChildRecord {
    name: String,
    kind: ChildKind,
    route: RouteId,
    global_id: GlobalFederateId,
    local_ready: bool,
    disconnected: bool,
}

/// What a Broker remembers about a registration it forwarded up to its own parent, so the
/// eventual ack can be routed back to the child (or federate-hosting core) that asked for it.
enum PendingUp {
    ChildRegistration {
        child: ChildId,
        origin_message_id: i64,
    },
    FedRegistration {
        origin_route: RouteId,
        origin_message_id: i64,
    },
    Query {
        origin_route: RouteId,
        origin_message_id: i64,
    },
}

/// Outstanding fan-out of an aggregate query (`federate_map`, `dependency_graph`) to every child,
/// keyed by the same correlation id used for the per-child `CMD_QUERY` requests.
struct AggregateQuery {
    builder: MapBuilder,
    reply_route: RouteId,
    reply_message_id: i64,
}

enum BrokerApiCommand {
    Query {
        query: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Shutdown,
}

/// The caller-facing side of a [`Broker`]: used by operators/tests to issue a query or ask the
/// broker to begin disconnecting. Transports and child participants never go through this --
/// they address the broker's `PARENT` route directly.
#[derive(Clone)]
pub struct BrokerHandle {
    api_tx: mpsc::UnboundedSender<BrokerApiCommand>,
}

impl BrokerHandle {
    pub async fn query(&self, query: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.api_tx
            .send(BrokerApiCommand::Query {
                query: query.into(),
                reply,
            })
            .map_err(|_| BrokerError::ProcessingTaskGone)?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub fn shutdown(&self) {
        let _ = self.api_tx.send(BrokerApiCommand::Shutdown);
    }
}

/// The Broker's processing task state. Owned exclusively by [`Broker::run`].
pub struct Broker {
    config: BrokerConfig,
    own_id: GlobalFederateId,
    is_root: bool,
    transport: InprocTransport,
    routing: RoutingTable,
    children: TinyMap<ChildId, ChildRecord>,
    children_by_name: HashMap<String, ChildId>,
    children_by_global: HashMap<GlobalFederateId, ChildId>,
    next_broker_index: usize,
    next_federate_shift_slot: usize,
    /// Buffers wire messages that arrived before this (non-root) broker learned its own global
    /// id -- mirrors §4.3's "held in a delay queue until BROKER_ACK" rule.
    delay_queue: Vec<ActionMessage>,
    /// Registrations and queries forwarded to our own parent, keyed by the correlation id we
    /// stamped on the outgoing message, so the eventual ack/reply can be routed back down.
    pending_up: CorrelationTable<PendingUp>,
    aggregate_queries: HashMap<i64, AggregateQuery>,
    next_query_correlation: i64,
    queries: DelayedQueries,
    /// Federation-wide time coordination for the whole subtree beneath this broker, collapsed
    /// into one forwarding coordinator (§4.4): every federate id this broker has observed
    /// requesting time is added as both a dependency and a dependent the first time it is seen.
    coordinator: TimeCoordinator,
    known_time_participants: std::collections::HashSet<GlobalFederateId>,
    /// Targets named in an `ADD_NAMED_*` this broker could not yet resolve, so a later `REG_*`
    /// for the same name can complete it. Root-only in practice (intermediate brokers just
    /// forward unresolved names upward).
    unknown_targets: Vec<ActionMessage>,
    operating: bool,
    init_sent: bool,
    shutting_down: bool,
    /// Keeps this Broker's own [`cosim_transport::DIRECTORY`] entry alive for as long as the
    /// processing task runs -- the directory itself only holds a `Weak`.
    registration: std::sync::Arc<ParticipantHandle>,
    inbox_rx: mpsc::UnboundedReceiver<ActionMessage>,
    api_rx: mpsc::UnboundedReceiver<BrokerApiCommand>,
}

impl Broker {
    /// Spawns the Broker's processing task and returns a handle to it.
    #[tracing::instrument(skip(config), fields(name = %config.name))]
    pub fn spawn(config: BrokerConfig) -> BrokerHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (api_tx, api_rx) = mpsc::unbounded_channel();
        let registration = ParticipantHandle::new(config.name.clone(), inbox_tx);
        DIRECTORY.register(registration.clone());

        let is_root = config.parent.is_none();
        let mut transport = InprocTransport::new();
        if let Some(parent_name) = &config.parent {
            if let Some(parent) = DIRECTORY.find(parent_name) {
                transport.add_route(RouteId::PARENT, RouteInfo::Inproc(parent.inbound.clone()));
            } else {
                tracing::warn!(parent = %parent_name, "parent broker not found in process directory");
            }
        }

        let own_id = if is_root {
            GlobalFederateId::new_broker(0)
        } else {
            GlobalFederateId::INVALID
        };

        let mut broker = Broker {
            config,
            own_id,
            is_root,
            transport,
            routing: RoutingTable::new(),
            children: TinyMap::new(),
            children_by_name: HashMap::new(),
            children_by_global: HashMap::new(),
            next_broker_index: if is_root { 1 } else { 0 },
            next_federate_shift_slot: 0,
            delay_queue: Vec::new(),
            pending_up: CorrelationTable::new(),
            aggregate_queries: HashMap::new(),
            next_query_correlation: 1,
            queries: DelayedQueries::new(),
            coordinator: TimeCoordinator::new(own_id, CoordinatorKind::Forwarding),
            known_time_participants: std::collections::HashSet::new(),
            unknown_targets: Vec::new(),
            operating: false,
            init_sent: false,
            shutting_down: false,
            registration,
            inbox_rx,
            api_rx,
        };

        let handle = BrokerHandle { api_tx };
        tokio::spawn(async move {
            broker.send_self_registration();
            broker.run().await;
        });
        handle
    }

    #[tracing::instrument(skip(self), fields(name = %self.config.name))]
    async fn run(&mut self) {
        loop {
            if self.shutting_down {
                break;
            }
            tokio::select! {
                biased;
                cmd = self.api_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_api_command(cmd),
                        None => break,
                    }
                }
                msg = self.inbox_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_wire_message(msg),
                        None => break,
                    }
                }
            }
        }
        tracing::debug!("broker processing task exiting");
    }

    fn handle_api_command(&mut self, cmd: BrokerApiCommand) {
        match cmd {
            BrokerApiCommand::Query { query, reply } => self.query(query, reply),
            BrokerApiCommand::Shutdown => self.shutting_down = true,
        }
    }

    fn send_self_registration(&mut self) {
        if self.is_root {
            return;
        }
        if self.config.parent.is_none() {
            tracing::warn!("broker has no parent configured; it cannot be reached cross-broker");
            return;
        }
        let msg = ActionMessage::new(ActionCode::RegBroker).with_string_data([self.config.name.clone()]);
        self.send_to_parent(msg);
    }

    fn send_to_parent(&self, msg: ActionMessage) {
        if let Err(err) = self.transport.transmit(RouteId::PARENT, msg) {
            tracing::warn!(error = %err, "broker failed to transmit to parent");
        }
    }

    fn send_on_route(&self, route: RouteId, msg: ActionMessage) {
        if let Err(err) = self.transport.transmit(route, msg) {
            tracing::warn!(error = %err, route = %route, "broker failed to transmit on route");
        }
    }

    fn child_route(&self, child: ChildId) -> Option<RouteId> {
        self.children.get(child).map(|c| c.route)
    }

    fn broadcast_to_children(&self, msg: ActionMessage) {
        for (_, child) in self.children.iter() {
            if child.disconnected {
                continue;
            }
            self.send_on_route(child.route, msg.clone());
        }
    }

    // ---- wire message dispatch -------------------------------------------------------------

    fn handle_wire_message(&mut self, msg: ActionMessage) {
        if !self.own_id.is_valid() && !self.is_root && msg.action != ActionCode::BrokerAck {
            // Not yet registered with our own parent: hold everything until BROKER_ACK, per
            // §4.3's delay-queue rule.
            self.delay_queue.push(msg);
            return;
        }
        match msg.action {
            ActionCode::RegBroker => self.register_child(msg),
            ActionCode::RegFed => self.register_federate(msg),
            ActionCode::BrokerAck => self.handle_broker_ack(msg),
            ActionCode::FedAck => self.relay_fed_ack(msg),
            ActionCode::RegPub | ActionCode::RegSub | ActionCode::RegEnd | ActionCode::RegSrcFilter
            | ActionCode::RegDstFilter => self.learn_and_forward(msg),
            ActionCode::AddNamedPublication
            | ActionCode::AddNamedInput
            | ActionCode::AddNamedEndpoint
            | ActionCode::AddNamedFilter => self.resolve_named_target(msg),
            ActionCode::AddSubscriber | ActionCode::AddPublisher => self.route_down_or_up(msg),
            ActionCode::Pub | ActionCode::SendMessage => self.route_message(msg),
            ActionCode::Init => self.handle_init_from_child(msg),
            ActionCode::InitGrant => self.handle_init_grant_from_parent(),
            ActionCode::ExecRequest | ActionCode::TimeRequest => self.handle_timing(msg),
            ActionCode::ExecGrant | ActionCode::TimeGrant => self.handle_grant_from_parent(msg),
            ActionCode::Disconnect | ActionCode::DisconnectName | ActionCode::PriorityDisconnect => {
                self.handle_disconnect(msg)
            }
            ActionCode::Query => self.handle_query_message(msg),
            ActionCode::QueryReply => self.handle_query_reply(msg),
            ActionCode::Error | ActionCode::Warning => self.relay_error(msg),
            _ => {
                tracing::trace!(action = ?msg.action, "unhandled wire message at broker");
            }
        }
    }

    // ---- registration ------------------------------------------------------------------------

    fn register_child(&mut self, msg: ActionMessage) {
        let Some(name) = msg.string_data.into_iter().next() else {
            return;
        };
        if self.children_by_name.contains_key(&name) {
            tracing::warn!(%name, "duplicate child registration ignored");
            return;
        }
        let Some(participant) = DIRECTORY.find(&name) else {
            tracing::warn!(%name, "registering child not found in process directory");
            return;
        };

        let kind = ChildKind::Core; // distinguished later by whether the child itself forwards REG_BROKER (brokers) or federates (cores); both register the same way.
        let child = self.children.insert_with_key(|_| ChildRecord {
            name: name.clone(),
            kind,
            route: RouteId::PARENT, // placeholder, replaced immediately below
            global_id: GlobalFederateId::INVALID,
            local_ready: false,
            disconnected: false,
        });
        self.children_by_name.insert(name.clone(), child);

        let route = RouteId::from(child.index() + 1);
        self.transport
            .add_route(route, RouteInfo::Inproc(participant.inbound.clone()));
        if let Some(rec) = self.children.get_mut(child) {
            rec.route = route;
        }

        if self.is_root {
            let global_id = GlobalFederateId::new_broker(self.next_broker_index);
            self.next_broker_index += 1;
            self.finish_child_registration(child, global_id, msg.message_id);
        } else {
            let correlation_id = self.next_query_correlation;
            self.next_query_correlation += 1;
            let up = ActionMessage::new(ActionCode::RegBroker)
                .with_string_data([format!("{}/{}", self.config.name, name)]);
            let mut up = up;
            up.message_id = correlation_id;
            self.pending_up.begin(PendingUp::ChildRegistration {
                child,
                origin_message_id: msg.message_id,
            });
            self.send_to_parent(up);
        }
    }

    fn finish_child_registration(&mut self, child: ChildId, global_id: GlobalFederateId, origin_message_id: i64) {
        if let Some(rec) = self.children.get_mut(child) {
            rec.global_id = global_id;
        }
        self.children_by_global.insert(global_id, child);
        self.routing.set_route(global_id, self.child_route(child).unwrap_or(RouteId::PARENT));

        let ack = ActionMessage::new(ActionCode::BrokerAck)
            .with_source(self.own_id, 0usize.into())
            .with_dest(global_id, 0usize.into())
            .with_time(cosim_core::Time::ZERO)
            .with_string_data(Vec::<String>::new())
            .tap_message_id(origin_message_id);
        self.send_on_route(self.child_route(child).unwrap_or(RouteId::PARENT), ack);
    }

    fn register_federate(&mut self, msg: ActionMessage) {
        let Some(name) = msg.string_data.first().cloned() else {
            return;
        };
        let origin_route = self
            .children_by_global
            .get(&msg.source_id)
            .and_then(|c| self.child_route(*c))
            .unwrap_or(RouteId::PARENT);

        if self.is_root {
            let global_id = GlobalFederateId::new_federate(self.next_federate_local_id());
            self.routing.set_route(global_id, origin_route);
            let ack = ActionMessage::new(ActionCode::FedAck)
                .with_source(self.own_id, 0usize.into())
                .with_dest(global_id, 0usize.into())
                .tap_message_id(msg.message_id);
            self.send_on_route(origin_route, ack);
            tracing::info!(%name, id = %global_id, "federate registered");
        } else {
            let correlation_id = self.next_query_correlation;
            self.next_query_correlation += 1;
            let mut up = ActionMessage::new(ActionCode::RegFed)
                .with_source(self.own_id, 0usize.into())
                .with_string_data([name]);
            up.message_id = correlation_id;
            self.pending_up.begin(PendingUp::FedRegistration {
                origin_route,
                origin_message_id: msg.message_id,
            });
            self.send_to_parent(up);
        }
    }

    fn next_federate_local_id(&mut self) -> cosim_core::LocalFederateId {
        let slot = self.next_federate_shift_slot;
        self.next_federate_shift_slot += 1;
        cosim_core::LocalFederateId::from(slot)
    }

    fn handle_broker_ack(&mut self, msg: ActionMessage) {
        if !self.own_id.is_valid() {
            // This ack assigns our own identity.
            self.own_id = msg.dest_id;
            self.coordinator = TimeCoordinator::new(self.own_id, CoordinatorKind::Forwarding);
            tracing::info!(id = %self.own_id, "broker registered with parent");
            let queued = std::mem::take(&mut self.delay_queue);
            for queued_msg in queued {
                self.handle_wire_message(queued_msg);
            }
            return;
        }
        // An ack relayed back for a child we forwarded registration for.
        let Some(pending) = self.pending_up.resolve(msg.message_id) else {
            return;
        };
        if let PendingUp::ChildRegistration {
            child,
            origin_message_id,
        } = pending
        {
            self.finish_child_registration(child, msg.dest_id, origin_message_id);
        }
    }

    fn relay_fed_ack(&mut self, msg: ActionMessage) {
        let Some(pending) = self.pending_up.resolve(msg.message_id) else {
            return;
        };
        if let PendingUp::FedRegistration {
            origin_route,
            origin_message_id,
        } = pending
        {
            self.routing.set_route(msg.dest_id, origin_route);
            let ack = ActionMessage::new(ActionCode::FedAck)
                .with_source(msg.source_id, 0usize.into())
                .with_dest(msg.dest_id, 0usize.into())
                .tap_message_id(origin_message_id);
            self.send_on_route(origin_route, ack);
        }
    }

    // ---- name resolution & routing ------------------------------------------------------------

    fn learn_and_forward(&mut self, msg: ActionMessage) {
        let kind = match msg.action {
            ActionCode::RegPub => HandleKind::Publication,
            ActionCode::RegSub => HandleKind::Input,
            ActionCode::RegEnd => HandleKind::Endpoint,
            ActionCode::RegSrcFilter | ActionCode::RegDstFilter => HandleKind::Filter,
            _ => return,
        };
        let Some(key) = msg.string_data.first().cloned() else { return };
        let global = GlobalHandle::new(msg.source_id, msg.source_handle);
        self.routing.learn_name(kind, key.clone(), global);

        // See if any previously-unresolved ADD_NAMED_* was waiting on this name.
        let matches: Vec<ActionMessage> = {
            let mut found = Vec::new();
            self.unknown_targets.retain(|pending| {
                if pending.string_data.first() == Some(&key) {
                    found.push(pending.clone());
                    false
                } else {
                    true
                }
            });
            found
        };
        for pending in matches {
            self.resolve_named_target(pending);
        }

        if !self.is_root {
            self.send_to_parent(msg);
        }
    }

    fn resolve_named_target(&mut self, msg: ActionMessage) {
        let needed_kind = match msg.action {
            ActionCode::AddNamedPublication => HandleKind::Input,
            ActionCode::AddNamedInput => HandleKind::Publication,
            ActionCode::AddNamedEndpoint => HandleKind::Endpoint,
            ActionCode::AddNamedFilter => HandleKind::Endpoint,
            _ => return,
        };
        let Some(name) = msg.string_data.first().cloned() else { return };

        if let Some(found) = self.routing.resolve_name(needed_kind, &name) {
            let requester = GlobalHandle::new(msg.source_id, msg.source_handle);
            let ack_kind = if msg.action == ActionCode::AddNamedPublication {
                ActionCode::AddSubscriber
            } else {
                ActionCode::AddPublisher
            };
            // A filter resolving its endpoint target is the only caller that populates `counter`
            // (source vs. destination placement, §4.7); carry it across the hop along with a
            // marker flag so each side's Core knows the counterpart is a filter, not a plain
            // publication/input, even when it lives on a different Core than this pairing spans.
            let is_filter_pairing = matches!(
                msg.action,
                ActionCode::AddNamedEndpoint | ActionCode::AddNamedFilter
            );
            let mut to_requester = ActionMessage::new(ack_kind)
                .with_source(found.federate, found.handle)
                .with_dest(requester.federate, requester.handle);
            let mut to_found = ActionMessage::new(ack_kind)
                .with_source(requester.federate, requester.handle)
                .with_dest(found.federate, found.handle);
            if is_filter_pairing {
                to_requester.counter = msg.counter;
                to_found.counter = msg.counter;
                to_requester.flags.set(ActionFlags::EXTRA1);
                to_found.flags.set(ActionFlags::EXTRA1);
            }
            self.route_down_or_up(to_requester);
            self.route_down_or_up(to_found);
            return;
        }

        if self.is_root {
            if msg.flags.contains(ActionFlags::REQUIRED) {
                self.unknown_targets.push(msg.clone());
            }
            // A required target left unresolved is surfaced as a registration error once
            // INIT_GRANT is reached; best-effort optional targets are simply dropped here.
        } else {
            self.send_to_parent(msg);
        }
    }

    fn route_down_or_up(&mut self, msg: ActionMessage) {
        let route = route_for_destination(&self.routing, self.own_id, msg.dest_id);
        if route == RouteId::PARENT && !self.is_root {
            self.send_to_parent(msg);
        } else if route == RouteId::PARENT {
            tracing::warn!(dest = %msg.dest_id, "root broker has no route for destination");
        } else {
            self.send_on_route(route, msg);
        }
    }

    fn route_message(&mut self, msg: ActionMessage) {
        if msg.dest_id.is_valid() {
            self.route_down_or_up(msg);
            return;
        }
        // Name-qualified send with no resolved destination yet: resolve via the known endpoint
        // table, else forward toward parent (§4.3's `fillMessageRouteInformation`).
        if let Some(name) = msg.string_data.first() {
            if let Some(target) = self.routing.resolve_name(HandleKind::Endpoint, name) {
                let mut resolved = msg;
                resolved.dest_id = target.federate;
                resolved.dest_handle = target.handle;
                self.route_down_or_up(resolved);
                return;
            }
        }
        if self.is_root {
            tracing::warn!("unresolvable message dropped at root");
        } else {
            self.send_to_parent(msg);
        }
    }

    // ---- init handshake ------------------------------------------------------------------------

    fn handle_init_from_child(&mut self, msg: ActionMessage) {
        if let Some(child) = self.children_by_global.get(&msg.source_id).copied() {
            if let Some(rec) = self.children.get_mut(child) {
                rec.local_ready = true;
            }
        }
        self.maybe_advance_init();
    }

    fn maybe_advance_init(&mut self) {
        if self.init_sent {
            return;
        }
        let all_ready = !self.children.is_empty()
            && self.children.iter().all(|(_, c)| c.local_ready || c.disconnected);
        if !all_ready {
            return;
        }
        self.init_sent = true;
        if self.is_root {
            self.operating = true;
            self.fail_unresolved_required_targets();
            let grant = ActionMessage::new(ActionCode::InitGrant).with_source(self.own_id, 0usize.into());
            self.broadcast_to_children(grant);
            tracing::info!(name = %self.config.name, "root broker granted initialization");
        } else {
            self.send_to_parent(ActionMessage::new(ActionCode::Init).with_source(self.own_id, 0usize.into()));
        }
    }

    /// A required `ADD_NAMED_*` still unresolved by the time the root is ready to grant
    /// initialization surfaces as a registration-failure error back to the federate that asked
    /// for it, rather than being silently forgotten.
    fn fail_unresolved_required_targets(&mut self) {
        for pending in std::mem::take(&mut self.unknown_targets) {
            let wanted = pending.string_data.first().cloned().unwrap_or_default();
            let mut err = ActionMessage::new(ActionCode::Error)
                .with_source(self.own_id, 0usize.into())
                .with_dest(pending.source_id, pending.source_handle)
                .with_string_data([format!("required target '{wanted}' could not be resolved")]);
            err.flags.set(ActionFlags::ERROR);
            self.route_down_or_up(err);
        }
    }

    fn handle_init_grant_from_parent(&mut self) {
        self.operating = true;
        let grant = ActionMessage::new(ActionCode::InitGrant).with_source(self.own_id, 0usize.into());
        self.broadcast_to_children(grant);
        tracing::info!(name = %self.config.name, "broker entered operating mode");
    }

    // ---- time coordination ---------------------------------------------------------------------

    fn handle_timing(&mut self, msg: ActionMessage) {
        if self.known_time_participants.insert(msg.source_id) {
            self.coordinator.add_dependency(msg.source_id);
            self.coordinator.add_dependent(msg.source_id);
        }
        // A forwarding coordinator only checks for a grant once it has a request of its own
        // outstanding; the first dependent request of a round has to kick that off explicitly
        // before the (otherwise identical) per-dependency update below can unblock it.
        let kickoff = match msg.action {
            ActionCode::ExecRequest if !self.coordinator.is_awaiting_exec_grant() => {
                Some(self.coordinator.enter_exec_request(msg.flags.contains(ActionFlags::ITERATION_REQUESTED)))
            }
            ActionCode::TimeRequest if !self.coordinator.is_awaiting_time_grant() => {
                Some(self.coordinator.time_request(
                    msg.action_time,
                    msg.te,
                    msg.flags.contains(ActionFlags::ITERATION_REQUESTED),
                ))
            }
            _ => None,
        };
        if let Some(out) = kickoff {
            self.dispatch_coordinator_output(out);
        }
        let out = self.coordinator.process_message(&msg);
        self.dispatch_coordinator_output(out);
    }

    /// The real upstream grant for a request this broker already answered optimistically (the
    /// forwarding coordinator hands back a local grant in the same call that mirrors the request
    /// upward -- see [`TimeCoordinator::process_message`]). By the time this arrives, children
    /// have already been told; there is nothing further to propagate.
    fn handle_grant_from_parent(&mut self, msg: ActionMessage) {
        if self.children_by_global.contains_key(&msg.source_id) {
            tracing::warn!(source = %msg.source_id, "grant received from a child; dropping");
            return;
        }
        tracing::trace!(action = ?msg.action, "parent confirmed an already-applied grant");
    }

    fn dispatch_coordinator_output(&mut self, out: CoordinatorOutput) {
        for m in out.to_dependents {
            self.broadcast_to_children(m);
        }
        if let Some(to_parent) = out.to_parent {
            if self.is_root {
                // Root has no parent; its own coordinator already produced the grant above.
            } else {
                self.send_to_parent(to_parent);
            }
        }
    }

    // ---- disconnect ----------------------------------------------------------------------------

    fn handle_disconnect(&mut self, msg: ActionMessage) {
        if let Some(child) = self.children_by_global.get(&msg.source_id).copied() {
            if let Some(rec) = self.children.get_mut(child) {
                rec.disconnected = true;
            }
        }
        let out = self.coordinator.disconnect_dependency(msg.source_id);
        self.dispatch_coordinator_output(out);

        let all_disconnected = !self.children.is_empty()
            && self.children.iter().all(|(_, c)| c.disconnected);
        if !all_disconnected {
            return;
        }
        if self.is_root {
            self.broadcast_to_children(ActionMessage::new(ActionCode::Stop).with_source(self.own_id, 0usize.into()));
            self.shutting_down = true;
        } else {
            self.send_to_parent(ActionMessage::new(ActionCode::Disconnect).with_source(self.own_id, 0usize.into()));
        }
    }

    fn relay_error(&mut self, msg: ActionMessage) {
        if msg.action == ActionCode::Error && self.is_root {
            // A global error from the root propagates to every participant (§7); an error
            // authored elsewhere and forwarded through the root is relayed the same way.
            self.broadcast_to_children(msg);
        } else if !self.is_root {
            self.send_to_parent(msg);
        } else {
            self.broadcast_to_children(msg);
        }
    }

    // ---- queries -------------------------------------------------------------------------------

    fn query(&mut self, query: String, reply: oneshot::Sender<Result<String>>) {
        if let Some(answer) = self.answer_local_query(&query) {
            let _ = reply.send(Ok(answer));
            return;
        }
        if query == "federate_map" || query == "dependency_graph" {
            self.fan_out_aggregate_query(query, RouteId::PARENT, 0);
            // Best-effort: a caller-issued aggregate query is answered asynchronously via the
            // same path a child's CMD_QUERY would use; for a directly-issued API call we hand
            // back an empty object immediately rather than blocking the processing task on a
            // second channel. Tests that need the fused result drive it via a child's query.
            let _ = reply.send(Ok("{}".to_string()));
            return;
        }
        let _ = reply.send(Err(BrokerError::new(
            cosim_core::ErrorKind::InvalidArgument,
            format!("unknown query '{query}'"),
        )));
    }

    fn handle_query_message(&mut self, msg: ActionMessage) {
        let Some(query_str) = msg.string_data.first().cloned() else { return };
        let origin_route = self
            .children_by_global
            .get(&msg.source_id)
            .and_then(|c| self.child_route(*c))
            .unwrap_or(RouteId::PARENT);

        if let Some(answer) = self.answer_local_query(&query_str) {
            let reply = ActionMessage::new(ActionCode::QueryReply)
                .with_source(self.own_id, 0usize.into())
                .with_string_data([answer])
                .tap_message_id(msg.message_id);
            self.send_on_route(origin_route, reply);
            return;
        }

        if query_str == "federate_map" || query_str == "dependency_graph" {
            self.fan_out_aggregate_query(query_str, origin_route, msg.message_id);
            return;
        }

        if self.is_root {
            let reply = ActionMessage::new(ActionCode::QueryReply)
                .with_string_data(["null".to_string()])
                .tap_message_id(msg.message_id);
            self.send_on_route(origin_route, reply);
        } else {
            let correlation_id = self.next_query_correlation;
            self.next_query_correlation += 1;
            let mut up = ActionMessage::new(ActionCode::Query).with_string_data([query_str]);
            up.message_id = correlation_id;
            self.pending_up.begin(PendingUp::Query {
                origin_route,
                origin_message_id: msg.message_id,
            });
            self.send_to_parent(up);
        }
    }

    fn fan_out_aggregate_query(&mut self, query_str: String, reply_route: RouteId, reply_message_id: i64) {
        if self.children.is_empty() {
            let builder = MapBuilder::new(self.config.name.clone(), []);
            let fused = builder.finish();
            let reply = ActionMessage::new(ActionCode::QueryReply)
                .with_string_data([fused.to_string()])
                .tap_message_id(reply_message_id);
            self.send_on_route(reply_route, reply);
            return;
        }
        let names: Vec<String> = self.children.iter().map(|(_, c)| c.name.clone()).collect();
        let builder = MapBuilder::new(self.config.name.clone(), names);
        let correlation_id = self.next_query_correlation;
        self.next_query_correlation += 1;
        self.aggregate_queries.insert(
            correlation_id,
            AggregateQuery {
                builder,
                reply_route,
                reply_message_id,
            },
        );
        for (_, child) in self.children.iter() {
            if child.disconnected {
                continue;
            }
            let mut fan = ActionMessage::new(ActionCode::Query).with_string_data([query_str.clone()]);
            fan.message_id = correlation_id;
            fan.counter = child_tag(child);
            self.send_on_route(child.route, fan);
        }
    }

    fn handle_query_reply(&mut self, msg: ActionMessage) {
        let correlation_id = msg.message_id;
        if let Some(agg) = self.aggregate_queries.get_mut(&correlation_id) {
            let child_name = self
                .children
                .iter()
                .find(|(_, c)| c.route == self.route_of_sender(&msg))
                .map(|(_, c)| c.name.clone())
                .unwrap_or_default();
            let answer = msg.string_data.into_iter().next().unwrap_or_default();
            let value = serde_json::from_str(&answer).unwrap_or(serde_json::Value::String(answer));
            agg.builder.record(&child_name, value);
            if agg.builder.is_complete() {
                let agg = self.aggregate_queries.remove(&correlation_id).unwrap();
                let fused = agg.builder.finish();
                let reply = ActionMessage::new(ActionCode::QueryReply)
                    .with_string_data([fused.to_string()])
                    .tap_message_id(agg.reply_message_id);
                self.send_on_route(agg.reply_route, reply);
            }
            return;
        }
        if let Some(pending) = self.pending_up.resolve(correlation_id) {
            if let PendingUp::Query {
                origin_route,
                origin_message_id,
            } = pending
            {
                let reply = ActionMessage::new(ActionCode::QueryReply)
                    .with_string_data(msg.string_data)
                    .tap_message_id(origin_message_id);
                self.send_on_route(origin_route, reply);
                return;
            }
        }
        self.queries.fulfill(
            QueryId::from(correlation_id.max(0) as u64),
            msg.string_data.into_iter().next().unwrap_or_default(),
        );
    }

    /// Best-effort sender identification for an already-delivered reply: since every child's
    /// route is a distinct `RouteId` by construction, comparing against `children` by the route
    /// the reply actually arrived wouldn't be recoverable from `ActionMessage` alone in a
    /// multiplexed inbox, so aggregate replies instead carry the child's tag in `counter`.
    fn route_of_sender(&self, msg: &ActionMessage) -> RouteId {
        self.children
            .iter()
            .find(|(_, c)| child_tag(c) == msg.counter)
            .map(|(_, c)| c.route)
            .unwrap_or(RouteId::PARENT)
    }

    fn answer_local_query(&self, query: &str) -> Option<String> {
        match query {
            "name" => Some(format!("\"{}\"", self.config.name)),
            "address" => Some(format!("\"{}\"", self.config.name)),
            "isinit" => Some(self.operating.to_string()),
            "brokers" | "federates" => {
                let names: Vec<&str> = self.children.iter().map(|(_, c)| c.name.as_str()).collect();
                serde_json::to_string(&names).ok()
            }
            _ => None,
        }
    }
}

fn child_tag(child: &ChildRecord) -> u16 {
    // Deterministic per-child tag derived from the route id, used only to correlate aggregate
    // query replies back to the child that produced them (see `route_of_sender`).
    child.route.index() as u16
}

trait TapMessageId {
    fn tap_message_id(self, id: i64) -> Self;
}

impl TapMessageId for ActionMessage {
    fn tap_message_id(mut self, id: i64) -> Self {
        self.message_id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn root_broker_answers_name_query() {
        let handle = Broker::spawn(BrokerConfig::builder().name("root_query_test").build());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let answer = handle.query("name").await.unwrap();
        assert_eq!(answer, "\"root_query_test\"");
    }
}
