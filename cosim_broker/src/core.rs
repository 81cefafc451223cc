//! The Core leaf runtime (§4.5): hosts a set of local federates, their interface handles and
//! message/value queues, and the single processing task that is the sole mutator of all of it.
//!
//! Grounded on `boomerang_federated`'s `rti::federate::Federate::run` (the `tokio::select!
//! { biased; ... }` loop between a local command channel and an inbound frame) and on the
//! reference implementation's `CommonCore` (the processing-thread dispatch-by-action-kind model,
//! the per-federate delayed list for in-flight filter round trips).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use cosim_core::{GlobalFederateId, GlobalHandle, InterfaceHandle, LocalFederateId, RouteId, Time};
use cosim_runtime::filter::{organize_filter_operations, validate_destination_chain};
use cosim_runtime::{
    ActionCode, ActionFlags, ActionMessage, CoordinatorKind, CoordinatorOutput, DelayedQueries,
    FederateLifecycle, FederateState, FilterInfo, FilterOperator, FilterOperatorAirlock,
    FilterPlacement, HandleInfo, HandleKind, HandleRegistry, HandleTargets, QueryId, TimeCoordinator,
};
use cosim_tinymap::TinyMap;
use cosim_transport::{InprocTransport, ParticipantHandle, RouteInfo, Transport, DIRECTORY};

use crate::config::{CoreConfig, FederateInfo};
use crate::error::{BrokerError, Result};
use crate::routing::{route_for_destination, CorrelationTable, RoutingTable};

/// Outcome of a blocking timing call (`enterExecutingMode`, `timeRequest`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrantResult {
    pub granted_time: Time,
    pub iteration_complete: bool,
}

enum CoreApiCommand {
    RegisterFederate {
        info: FederateInfo,
        reply: oneshot::Sender<Result<LocalFederateId>>,
    },
    RegisterInterface {
        federate: LocalFederateId,
        kind: HandleKind,
        key: String,
        interface_type: String,
        units: String,
        reply: oneshot::Sender<Result<InterfaceHandle>>,
    },
    SetOption {
        handle: InterfaceHandle,
        required: bool,
        cloning: bool,
    },
    AddTarget {
        handle: InterfaceHandle,
        target_name: String,
        placement: Option<FilterPlacement>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetValue {
        federate: LocalFederateId,
        handle: InterfaceHandle,
        bytes: Vec<u8>,
    },
    SendMessage {
        federate: LocalFederateId,
        handle: InterfaceHandle,
        dest_endpoint: String,
        bytes: Vec<u8>,
        time: Option<Time>,
    },
    EnterExecutingMode {
        federate: LocalFederateId,
        iterating: bool,
        reply: oneshot::Sender<Result<GrantResult>>,
    },
    TimeRequest {
        federate: LocalFederateId,
        time: Time,
        iterating: bool,
        reply: oneshot::Sender<Result<GrantResult>>,
    },
    GetInput {
        federate: LocalFederateId,
        handle: InterfaceHandle,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    GetMessage {
        federate: LocalFederateId,
        handle: InterfaceHandle,
        reply: oneshot::Sender<Option<(Time, Vec<u8>)>>,
    },
    Query {
        query: String,
        reply: oneshot::Sender<Result<String>>,
    },
    SetFilterOperator {
        handle: InterfaceHandle,
        slot: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    SetFilterDelay {
        handle: InterfaceHandle,
        delay: Time,
    },
    Disconnect {
        federate: LocalFederateId,
    },
}

/// The caller-facing side of a [`Core`]: every method enqueues a command onto the processing
/// task and, for calls the reference API documents as blocking, awaits the matching reply.
#[derive(Clone)]
pub struct CoreHandle {
    api_tx: mpsc::UnboundedSender<CoreApiCommand>,
    filter_airlock: FilterOperatorAirlock,
}

impl CoreHandle {
    pub async fn register_federate(&self, info: FederateInfo) -> Result<LocalFederateId> {
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::RegisterFederate { info, reply })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub async fn register_interface(
        &self,
        federate: LocalFederateId,
        kind: HandleKind,
        key: impl Into<String>,
        interface_type: impl Into<String>,
        units: impl Into<String>,
    ) -> Result<InterfaceHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::RegisterInterface {
            federate,
            kind,
            key: key.into(),
            interface_type: interface_type.into(),
            units: units.into(),
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub fn set_option(&self, handle: InterfaceHandle, required: bool, cloning: bool) -> Result<()> {
        self.send(CoreApiCommand::SetOption {
            handle,
            required,
            cloning,
        })
    }

    pub async fn add_target(
        &self,
        handle: InterfaceHandle,
        target_name: impl Into<String>,
        placement: Option<FilterPlacement>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::AddTarget {
            handle,
            target_name: target_name.into(),
            placement,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub fn set_value(&self, federate: LocalFederateId, handle: InterfaceHandle, bytes: Vec<u8>) -> Result<()> {
        self.send(CoreApiCommand::SetValue {
            federate,
            handle,
            bytes,
        })
    }

    pub fn send_message(
        &self,
        federate: LocalFederateId,
        handle: InterfaceHandle,
        dest_endpoint: impl Into<String>,
        bytes: Vec<u8>,
        time: Option<Time>,
    ) -> Result<()> {
        self.send(CoreApiCommand::SendMessage {
            federate,
            handle,
            dest_endpoint: dest_endpoint.into(),
            bytes,
            time,
        })
    }

    pub async fn enter_executing_mode(
        &self,
        federate: LocalFederateId,
        iterating: bool,
    ) -> Result<GrantResult> {
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::EnterExecutingMode {
            federate,
            iterating,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub async fn time_request(
        &self,
        federate: LocalFederateId,
        time: Time,
        iterating: bool,
    ) -> Result<GrantResult> {
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::TimeRequest {
            federate,
            time,
            iterating,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub async fn get_input(&self, federate: LocalFederateId, handle: InterfaceHandle) -> Option<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        if self
            .send(CoreApiCommand::GetInput {
                federate,
                handle,
                reply,
            })
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn get_message(
        &self,
        federate: LocalFederateId,
        handle: InterfaceHandle,
    ) -> Option<(Time, Vec<u8>)> {
        let (reply, rx) = oneshot::channel();
        if self
            .send(CoreApiCommand::GetMessage {
                federate,
                handle,
                reply,
            })
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn query(&self, query: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::Query {
            query: query.into(),
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    pub async fn set_filter_operator(
        &self,
        handle: InterfaceHandle,
        op: Box<dyn FilterOperator>,
    ) -> Result<()> {
        let slot = self.filter_airlock.publish(op);
        let (reply, rx) = oneshot::channel();
        self.send(CoreApiCommand::SetFilterOperator { handle, slot, reply })?;
        rx.await.map_err(|_| BrokerError::ProcessingTaskGone)?
    }

    /// Sets the fixed delivery delay a destination filter adds to a message's action time
    /// (§4.7). Cross-thread publication goes through the same plain command path as
    /// [`Self::set_option`]: a `Time` is POD, so no airlock slot is needed.
    pub fn set_filter_delay(&self, handle: InterfaceHandle, delay: Time) -> Result<()> {
        self.send(CoreApiCommand::SetFilterDelay { handle, delay })
    }

    pub fn disconnect(&self, federate: LocalFederateId) -> Result<()> {
        self.send(CoreApiCommand::Disconnect { federate })
    }

    fn send(&self, cmd: CoreApiCommand) -> Result<()> {
        self.api_tx
            .send(cmd)
            .map_err(|_| BrokerError::ProcessingTaskGone)
    }
}

struct FilterEntry {
    info: FilterInfo,
    owner_core_global: GlobalFederateId,
    op: Option<Box<dyn FilterOperator>>,
}

impl FilterEntry {
    fn operator(&self) -> Option<&dyn FilterOperator> {
        self.op.as_deref()
    }
}

/// A `SEND_MESSAGE`/`PUB` held at the destination endpoint's Core while its one supported
/// cross-core destination filter hop is outstanding (§4.7).
struct PendingDestFilter {
    target: InterfaceHandle,
    owner: LocalFederateId,
    owner_global: GlobalFederateId,
    action: ActionCode,
    source_id: GlobalFederateId,
    source_handle: InterfaceHandle,
    action_time: Time,
}

/// A message held at the sending endpoint's Core while its one supported cross-core source
/// filter hop is outstanding (§4.7).
struct PendingSourceFilter {
    source_global: GlobalHandle,
    dest_endpoint: String,
    send_time: Time,
}

/// Runs a (possibly absent) filter chain over `payload`, returning the transformed bytes and the
/// summed fixed delay every stage in the chain contributes. Shared by the source- and
/// destination-chain callers below; a stage with no operator attached yet still contributes its
/// configured delay.
fn run_filter_chain(
    chain: Option<&Vec<InterfaceHandle>>,
    filters: &HashMap<InterfaceHandle, FilterEntry>,
    payload: Vec<u8>,
) -> (Vec<u8>, Time) {
    let Some(chain) = chain else {
        return (payload, Time::ZERO);
    };
    let mut current = payload;
    let mut total_delay = Time::ZERO;
    for filter_handle in chain {
        let Some(entry) = filters.get(filter_handle) else {
            continue;
        };
        total_delay += entry.info.delay;
        let Some(op) = entry.operator() else { continue };
        match op.process(&current) {
            Some(next) => current = next,
            None => return (Vec::new(), total_delay),
        }
    }
    (current, total_delay)
}

/// The Core's processing task state. Owned exclusively by [`Core::run`]; nothing else touches it.
pub struct Core {
    config: CoreConfig,
    own_id: GlobalFederateId,
    transport: InprocTransport,
    routing: RoutingTable,
    federates: TinyMap<LocalFederateId, FederateState>,
    federates_by_name: HashMap<String, LocalFederateId>,
    handles: HandleRegistry,
    handle_targets: HandleTargets,
    filters: HashMap<InterfaceHandle, FilterEntry>,
    source_chain: HashMap<InterfaceHandle, Vec<InterfaceHandle>>,
    dest_chain: HashMap<InterfaceHandle, Vec<InterfaceHandle>>,
    /// Filters wired onto a local endpoint whose filter itself lives on another Core, keyed by
    /// the local endpoint handle. Only the first entry of each chain is actually applied (§4.7's
    /// `counter`-indexed chain position is not walked past one cross-core hop); this is the one
    /// documented scoping cut in the filter pipeline, recorded in `DESIGN.md`.
    remote_source_filters: HashMap<InterfaceHandle, Vec<GlobalHandle>>,
    remote_dest_filters: HashMap<InterfaceHandle, Vec<GlobalHandle>>,
    next_pending_filter_id: i64,
    pending_dest_filter: HashMap<i64, PendingDestFilter>,
    pending_source_filter: HashMap<i64, PendingSourceFilter>,
    /// Outstanding cross-core filter round trips per owning federate -- incremented when a
    /// message from (or to) one of that federate's endpoints is sent out for remote filtering,
    /// decremented on `FILTER_RESULT`/`DEST_FILTER_RESULT`/`NULL_*`. A federate's grant is held
    /// in [`Self::blocked_grants`] rather than released while its count is nonzero; this single
    /// counter realizes both the receiver-side `CMD_TIME_BLOCK` and the sender-side per-federate
    /// delayed list the reference implementation keeps as two separate mechanisms.
    filter_round_trips: HashMap<GlobalFederateId, u32>,
    blocked_grants: HashMap<GlobalFederateId, (ActionMessage, oneshot::Sender<Result<GrantResult>>)>,
    filter_airlock: FilterOperatorAirlock,
    reg_correlation: CorrelationTable<oneshot::Sender<Result<()>>>,
    next_fed_correlation: i64,
    fed_ack_waiters: HashMap<i64, oneshot::Sender<Result<LocalFederateId>>>,
    pending_fed_register: HashMap<i64, (LocalFederateId, String)>,
    queries: DelayedQueries,
    broker_ack: Option<oneshot::Sender<()>>,
    operating: bool,
    init_sent: bool,
    max_iteration_default: u16,
    grant_waiters: HashMap<GlobalFederateId, oneshot::Sender<Result<GrantResult>>>,
    /// Keeps this Core's own [`cosim_transport::DIRECTORY`] entry alive for as long as the
    /// processing task runs -- the directory itself only holds a `Weak`.
    registration: Arc<ParticipantHandle>,
    /// One forwarding coordinator for the whole Core: every hosted federate is both a dependency
    /// and a dependent of it, so the Core only relays an exec/time request upstream (and only
    /// releases a grant to any of its federates) once every federate it hosts has asked.
    upstream: TimeCoordinator,
    /// A grant [`Self::upstream`] already computed before `INIT_GRANT` arrived, held back until
    /// `handle_init_grant` -- a grant resolved any earlier could race a required-target
    /// registration-failure error that `INIT_GRANT` itself still has to deliver (§8c).
    pending_local_grant: Option<ActionMessage>,
    inbox_rx: mpsc::UnboundedReceiver<ActionMessage>,
    api_rx: mpsc::UnboundedReceiver<CoreApiCommand>,
}

impl Core {
    /// Spawns the Core's processing task and returns a handle to it.
    #[tracing::instrument(skip(config), fields(name = %config.name))]
    pub fn spawn(config: CoreConfig) -> CoreHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (api_tx, api_rx) = mpsc::unbounded_channel();
        let registration = ParticipantHandle::new(config.name.clone(), inbox_tx);
        DIRECTORY.register(registration.clone());

        let mut transport = InprocTransport::new();
        if let Some(parent_name) = &config.parent {
            if let Some(parent) = DIRECTORY.find(parent_name) {
                transport.add_route(RouteId::PARENT, RouteInfo::Inproc(parent.inbound.clone()));
            } else {
                tracing::warn!(parent = %parent_name, "parent broker not found in process directory");
            }
        }

        let max_iteration_count = config.max_iteration_count;
        let filter_airlock: FilterOperatorAirlock = Arc::new(cosim_runtime::Airlock::new());
        let mut core = Core {
            config,
            own_id: GlobalFederateId::INVALID,
            transport,
            routing: RoutingTable::new(),
            federates: TinyMap::new(),
            federates_by_name: HashMap::new(),
            handles: HandleRegistry::new(),
            handle_targets: HandleTargets::new(),
            filters: HashMap::new(),
            source_chain: HashMap::new(),
            dest_chain: HashMap::new(),
            remote_source_filters: HashMap::new(),
            remote_dest_filters: HashMap::new(),
            next_pending_filter_id: 1,
            pending_dest_filter: HashMap::new(),
            pending_source_filter: HashMap::new(),
            filter_round_trips: HashMap::new(),
            blocked_grants: HashMap::new(),
            filter_airlock: filter_airlock.clone(),
            reg_correlation: CorrelationTable::new(),
            next_fed_correlation: 1,
            fed_ack_waiters: HashMap::new(),
            pending_fed_register: HashMap::new(),
            queries: DelayedQueries::new(),
            broker_ack: None,
            operating: false,
            init_sent: false,
            max_iteration_default: max_iteration_count,
            grant_waiters: HashMap::new(),
            registration,
            upstream: TimeCoordinator::new(GlobalFederateId::INVALID, CoordinatorKind::Forwarding),
            pending_local_grant: None,
            inbox_rx,
            api_rx,
        };

        let handle = CoreHandle { api_tx, filter_airlock };
        tokio::spawn(async move {
            core.send_self_registration();
            core.run().await;
        });
        handle
    }

    #[tracing::instrument(skip(self), fields(name = %self.config.name))]
    async fn run(&mut self) {
        loop {
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
        tracing::debug!("core processing task exiting");
    }

    fn send_self_registration(&mut self) {
        if self.config.parent.is_none() {
            tracing::warn!("core has no parent broker configured; it cannot be reached cross-core");
            return;
        }
        let msg = ActionMessage::new(ActionCode::RegBroker)
            .with_string_data([self.config.name.clone()])
            .with_source(GlobalFederateId::PARENT, 0usize.into());
        self.send_to_parent(msg);
    }

    fn send_to_parent(&self, msg: ActionMessage) {
        if let Err(err) = self.transport.transmit(RouteId::PARENT, msg) {
            tracing::warn!(error = %err, "failed to transmit to parent");
        }
    }

    // ---- API command handling -------------------------------------------------------------

    fn handle_api_command(&mut self, cmd: CoreApiCommand) {
        match cmd {
            CoreApiCommand::RegisterFederate { info, reply } => self.register_federate(info, reply),
            CoreApiCommand::RegisterInterface {
                federate,
                kind,
                key,
                interface_type,
                units,
                reply,
            } => {
                let result = self.register_interface(federate, kind, key, interface_type, units);
                let _ = reply.send(result);
            }
            CoreApiCommand::SetOption {
                handle,
                required,
                cloning,
            } => {
                self.handles.set_option(handle, |opts| {
                    opts.required = required;
                    opts.cloning = cloning;
                });
            }
            CoreApiCommand::AddTarget {
                handle,
                target_name,
                placement,
                reply,
            } => self.add_target(handle, target_name, placement, reply),
            CoreApiCommand::SetValue {
                federate,
                handle,
                bytes,
            } => self.set_value(federate, handle, bytes),
            CoreApiCommand::SendMessage {
                federate,
                handle,
                dest_endpoint,
                bytes,
                time,
            } => self.send_message(federate, handle, dest_endpoint, bytes, time),
            CoreApiCommand::EnterExecutingMode {
                federate,
                iterating,
                reply,
            } => self.enter_executing_mode(federate, iterating, reply),
            CoreApiCommand::TimeRequest {
                federate,
                time,
                iterating,
                reply,
            } => self.time_request(federate, time, iterating, reply),
            CoreApiCommand::GetInput {
                federate,
                handle,
                reply,
            } => {
                let value = self
                    .federates
                    .get_mut(federate)
                    .and_then(|f| f.inputs.get(&handle))
                    .and_then(|v| v.latest.clone());
                let _ = reply.send(value);
            }
            CoreApiCommand::GetMessage {
                federate,
                handle,
                reply,
            } => {
                let value = self
                    .federates
                    .get_mut(federate)
                    .and_then(|f| f.endpoints.get_mut(&handle))
                    .and_then(|q| q.pop());
                let _ = reply.send(value);
            }
            CoreApiCommand::Query { query, reply } => self.query(query, reply),
            CoreApiCommand::SetFilterOperator { handle, slot, reply } => {
                let result = match self.filter_airlock.take(slot) {
                    Some(op) => {
                        if let Some(entry) = self.filters.get_mut(&handle) {
                            entry.op = Some(op);
                            Ok(())
                        } else {
                            Err(BrokerError::new(
                                cosim_core::ErrorKind::InvalidIdentifier,
                                "no such filter handle",
                            ))
                        }
                    }
                    None => Err(BrokerError::new(
                        cosim_core::ErrorKind::SystemFailure,
                        "filter operator airlock slot empty",
                    )),
                };
                let _ = reply.send(result);
            }
            CoreApiCommand::SetFilterDelay { handle, delay } => {
                if let Some(entry) = self.filters.get_mut(&handle) {
                    entry.info.delay = delay;
                }
            }
            CoreApiCommand::Disconnect { federate } => self.disconnect_federate(federate),
        }
    }

    fn register_federate(&mut self, info: FederateInfo, reply: oneshot::Sender<Result<LocalFederateId>>) {
        if self.federates_by_name.contains_key(&info.name) {
            let _ = reply.send(Err(BrokerError::new(
                cosim_core::ErrorKind::RegistrationFailure,
                format!("duplicate federate name '{}'", info.name),
            )));
            return;
        }
        let name = info.name.clone();
        let local_id = self
            .federates
            .insert_with_key(|local_id| FederateState::new(name.clone(), local_id));
        self.federates_by_name.insert(name.clone(), local_id);
        if let Some(state) = self.federates.get_mut(local_id) {
            state.coordinator.set_max_iteration_count(self.max_iteration_default);
        }

        let correlation_id = self.next_fed_correlation;
        self.next_fed_correlation += 1;
        let mut msg = ActionMessage::new(ActionCode::RegFed)
            .with_source(self.own_id, 0usize.into())
            .with_string_data([name]);
        msg.message_id = correlation_id;
        self.fed_ack_waiters.insert(correlation_id, reply);
        self.pending_fed_register
            .insert(correlation_id, (local_id, self.federates.get(local_id).unwrap().name.clone()));
        self.send_to_parent(msg);
    }

    fn register_interface(
        &mut self,
        federate: LocalFederateId,
        kind: HandleKind,
        key: String,
        interface_type: String,
        units: String,
    ) -> Result<InterfaceHandle> {
        let global_id = self
            .federates
            .get(federate)
            .map(|f| f.global_id)
            .ok_or_else(|| {
                BrokerError::new(cosim_core::ErrorKind::InvalidIdentifier, "unknown federate")
            })?;
        if !global_id.is_valid() {
            return Err(BrokerError::new(
                cosim_core::ErrorKind::InvalidFunctionCall,
                "federate has not completed registration",
            ));
        }
        let handle = self
            .handles
            .add_handle(federate, global_id, kind, key.clone(), interface_type.clone(), units.clone());

        if kind == HandleKind::Filter {
            let placement = FilterPlacement::Source;
            self.filters.insert(
                handle,
                FilterEntry {
                    info: {
                        let mut info = FilterInfo::new(handle, placement, false);
                        info.input_type = interface_type.clone();
                        info
                    },
                    owner_core_global: self.own_id,
                    op: None,
                },
            );
        }

        let global = GlobalHandle::new(global_id, handle);
        let announce = match kind {
            HandleKind::Publication => ActionCode::RegPub,
            HandleKind::Input => ActionCode::RegSub,
            HandleKind::Endpoint => ActionCode::RegEnd,
            HandleKind::Filter => ActionCode::RegSrcFilter,
        };
        let msg = ActionMessage::new(announce)
            .with_source(global_id, handle)
            .with_string_data([key, interface_type, units]);
        self.send_to_parent(msg);

        Ok(handle)
    }

    fn add_target(
        &mut self,
        handle: InterfaceHandle,
        target_name: String,
        placement: Option<FilterPlacement>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        let Some(info) = self.handles.get(handle).cloned() else {
            let _ = reply.send(Err(BrokerError::new(
                cosim_core::ErrorKind::InvalidIdentifier,
                "no such handle",
            )));
            return;
        };
        let needed_kind = match info.kind {
            HandleKind::Input => HandleKind::Publication,
            HandleKind::Filter => HandleKind::Endpoint,
            _ => {
                let _ = reply.send(Err(BrokerError::new(
                    cosim_core::ErrorKind::InvalidFunctionCall,
                    "only inputs and filters declare targets",
                )));
                return;
            }
        };

        if let Some(found) = self.handles.find(needed_kind, &target_name) {
            let found_info = self.handles.get(found).unwrap().clone();
            self.wire_local_pair(handle, &info, found, &found_info, placement);
            let _ = reply.send(Ok(()));
            return;
        }

        let action = if info.kind == HandleKind::Filter {
            ActionCode::AddNamedEndpoint
        } else {
            ActionCode::AddNamedPublication
        };
        let mut msg = ActionMessage::new(action)
            .with_source(info.global.federate, info.global.handle)
            .with_string_data([target_name]);
        if info.options.required {
            msg.flags.set(ActionFlags::REQUIRED);
        }
        if let Some(FilterPlacement::Destination) = placement {
            msg.counter = 1;
        }
        self.send_to_parent(msg);
        // Fire-and-forget for the cross-core path: resolution (or a registration-failure error
        // at init-grant time for a required, still-unresolved target) arrives asynchronously.
        let _ = reply.send(Ok(()));
    }

    fn wire_local_pair(
        &mut self,
        handle: InterfaceHandle,
        info: &HandleInfo,
        other: InterfaceHandle,
        other_info: &HandleInfo,
        placement: Option<FilterPlacement>,
    ) {
        self.handle_targets.add(handle, other_info.global);
        self.handle_targets.add(other, info.global);
        if info.kind == HandleKind::Filter {
            let placement = placement.unwrap_or(FilterPlacement::Source);
            let chain = match placement {
                FilterPlacement::Source => self.source_chain.entry(other).or_default(),
                FilterPlacement::Destination => self.dest_chain.entry(other).or_default(),
            };
            if !chain.contains(&handle) {
                chain.push(handle);
            }
            if let Some(entry) = self.filters.get_mut(&handle) {
                entry.info.placement = placement;
                entry.info.output_type = other_info.interface_type.clone();
            }
        }
    }

    fn set_value(&mut self, federate: LocalFederateId, handle: InterfaceHandle, bytes: Vec<u8>) {
        let Some(state) = self.federates.get_mut(federate) else {
            return;
        };
        let send_time = state.next_allowed_send_time;
        self.handles.mark_used(handle);
        let targets = self.handle_targets.get(handle).to_vec();
        for target in targets {
            let msg = ActionMessage::new(ActionCode::Pub)
                .with_source(self.handles.get(handle).map(|h| h.global.federate).unwrap_or_default(), handle)
                .with_dest(target.federate, target.handle)
                .with_time(send_time)
                .with_payload(bytes.clone());
            self.route_or_deliver(msg);
        }
    }

    fn send_message(
        &mut self,
        federate: LocalFederateId,
        handle: InterfaceHandle,
        dest_endpoint: String,
        bytes: Vec<u8>,
        time: Option<Time>,
    ) {
        let Some(state) = self.federates.get_mut(federate) else {
            return;
        };
        let send_time = time
            .unwrap_or(state.next_allowed_send_time)
            .max(state.next_allowed_send_time);
        let source_global = self.handles.get(handle).map(|h| h.global).unwrap_or(GlobalHandle::new(
            GlobalFederateId::INVALID,
            handle,
        ));

        if let Some(remote_filter) = self
            .remote_source_filters
            .get(&handle)
            .and_then(|chain| chain.first())
            .copied()
        {
            self.send_for_remote_source_filter(source_global, remote_filter, dest_endpoint, send_time, bytes);
            return;
        }

        let (payload, delay) = self.apply_source_filters(handle, bytes);
        self.route_endpoint_send(source_global, dest_endpoint, send_time + delay, payload);
    }

    /// Routes a (possibly filter-delayed) outgoing message to its named endpoint: locally if the
    /// name resolves to one of this Core's own handles, across the broker otherwise, or to the
    /// parent for name resolution if it has never been seen before.
    fn route_endpoint_send(&mut self, source_global: GlobalHandle, dest_endpoint: String, send_time: Time, payload: Vec<u8>) {
        if let Some(dest) = self.handles.find(HandleKind::Endpoint, &dest_endpoint) {
            let dest_global = self.handles.get(dest).unwrap().global;
            let msg = ActionMessage::new(ActionCode::SendMessage)
                .with_source(source_global.federate, source_global.handle)
                .with_dest(dest_global.federate, dest_global.handle)
                .with_time(send_time)
                .with_payload(payload);
            self.deliver_local_message(msg);
        } else if let Some(global) = self.routing.resolve_name(HandleKind::Endpoint, &dest_endpoint) {
            let msg = ActionMessage::new(ActionCode::SendMessage)
                .with_source(source_global.federate, source_global.handle)
                .with_dest(global.federate, global.handle)
                .with_time(send_time)
                .with_payload(payload);
            self.route_or_deliver(msg);
        } else {
            let msg = ActionMessage::new(ActionCode::SendMessage)
                .with_source(source_global.federate, source_global.handle)
                .with_time(send_time)
                .with_payload(payload)
                .with_string_data([dest_endpoint]);
            self.send_to_parent(msg);
        }
    }

    /// Sends a message out to a remote source filter via `SEND_FOR_FILTER_AND_RETURN`, holding
    /// the destination-name resolution until `FILTER_RESULT`/`NULL_MESSAGE` comes back (§4.7).
    /// The sending federate's grant is held back for as long as this is outstanding -- see
    /// [`Core::filter_round_trips`].
    fn send_for_remote_source_filter(
        &mut self,
        source_global: GlobalHandle,
        filter: GlobalHandle,
        dest_endpoint: String,
        send_time: Time,
        bytes: Vec<u8>,
    ) {
        let id = self.next_pending_filter_id;
        self.next_pending_filter_id += 1;
        *self.filter_round_trips.entry(source_global.federate).or_insert(0) += 1;
        self.pending_source_filter.insert(
            id,
            PendingSourceFilter {
                source_global,
                dest_endpoint,
                send_time,
            },
        );
        let mut out = ActionMessage::new(ActionCode::SendForFilterAndReturn)
            .with_source(source_global.federate, source_global.handle)
            .with_dest(filter.federate, filter.handle)
            .with_time(send_time)
            .with_payload(bytes);
        out.message_id = id;
        self.route_or_deliver(out);
    }

    /// Runs a `SEND_FOR_FILTER_AND_RETURN` request against a locally-owned filter and bounces the
    /// result (`FILTER_RESULT` or, if the filter dropped the message, `NULL_MESSAGE`) back to the
    /// requesting Core.
    fn handle_source_filter_request(&mut self, msg: ActionMessage) {
        let Some(filter_handle) = self.handles.find_global(GlobalHandle::new(msg.dest_id, msg.dest_handle)) else {
            return;
        };
        let Some(entry) = self.filters.get(&filter_handle) else {
            return;
        };
        let delay = entry.info.delay;
        let transformed = match entry.operator() {
            Some(op) => op.process(&msg.payload),
            None => Some(msg.payload.clone()),
        };
        let filter_global = self.handles.get(filter_handle).map(|h| h.global).unwrap_or(GlobalHandle::new(
            msg.dest_id,
            msg.dest_handle,
        ));
        let mut reply = match transformed {
            Some(payload) => ActionMessage::new(ActionCode::FilterResult)
                .with_source(filter_global.federate, filter_global.handle)
                .with_dest(msg.source_id, msg.source_handle)
                .with_time(delay)
                .with_payload(payload),
            None => ActionMessage::new(ActionCode::NullMessage)
                .with_source(filter_global.federate, filter_global.handle)
                .with_dest(msg.source_id, msg.source_handle)
                .with_time(delay),
        };
        reply.message_id = msg.message_id;
        self.route_or_deliver(reply);
    }

    /// Handles the `FILTER_RESULT`/`NULL_MESSAGE` reply to a source-filter round trip this Core
    /// started: resumes destination-name resolution (`msg.action_time` carries the filter's
    /// delay) and releases the sending federate's grant if nothing else is still outstanding.
    fn handle_source_filter_result(&mut self, msg: ActionMessage, delivered: bool) {
        let Some(pending) = self.pending_source_filter.remove(&msg.message_id) else {
            return;
        };
        let owner_global = pending.source_global.federate;
        if let Some(count) = self.filter_round_trips.get_mut(&owner_global) {
            *count = count.saturating_sub(1);
        }
        if delivered {
            self.route_endpoint_send(
                pending.source_global,
                pending.dest_endpoint,
                pending.send_time + msg.action_time,
                msg.payload,
            );
        }
        self.maybe_release_blocked_grant(owner_global);
    }

    fn route_or_deliver(&mut self, msg: ActionMessage) {
        if self.handles.find_global(GlobalHandle::new(msg.dest_id, msg.dest_handle)).is_some() {
            self.deliver_local_message(msg);
        } else {
            let route = route_for_destination(&self.routing, self.own_id, msg.dest_id);
            self.send_on_route(route, msg);
        }
    }

    fn send_on_route(&self, route: RouteId, msg: ActionMessage) {
        if let Err(err) = self.transport.transmit(route, msg) {
            tracing::warn!(error = %err, "failed to transmit");
        }
    }

    /// Delivers a `PUB`/`SEND_MESSAGE` addressed to one of this Core's own handles: applies the
    /// filter chain, deposits into the target federate's buffer, then feeds its time coordinator.
    /// If the endpoint's destination filter lives on another Core, the deposit is deferred until
    /// that round trip returns (§4.7) -- see [`Self::send_for_remote_dest_filter`].
    fn deliver_local_message(&mut self, msg: ActionMessage) {
        let Some(target) = self.handles.find_global(GlobalHandle::new(msg.dest_id, msg.dest_handle)) else {
            return;
        };
        let Some(info) = self.handles.get(target) else { return };
        let owner = info.owner;
        let owner_global = info.global.federate;

        if let Some(remote_filter) = self
            .remote_dest_filters
            .get(&target)
            .and_then(|chain| chain.first())
            .copied()
        {
            self.send_for_remote_dest_filter(target, owner, owner_global, remote_filter, msg);
            return;
        }

        let (payload, delay) = self.apply_destination_filters(target, msg.payload.clone());
        let delivery_time = msg.action_time + delay;
        self.finish_local_delivery(
            target,
            owner,
            owner_global,
            msg.action,
            msg.source_id,
            msg.source_handle,
            delivery_time,
            payload,
        );
    }

    /// Deposits `payload` into the target's buffer/queue and feeds its owner's time coordinator.
    /// Common tail of both the synchronous (local- or no-filter) and the cross-core-filter-return
    /// delivery paths.
    #[allow(clippy::too_many_arguments)]
    fn finish_local_delivery(
        &mut self,
        target: InterfaceHandle,
        owner: LocalFederateId,
        owner_global: GlobalFederateId,
        action: ActionCode,
        source_id: GlobalFederateId,
        source_handle: InterfaceHandle,
        delivery_time: Time,
        payload: Vec<u8>,
    ) {
        let Some(info) = self.handles.get(target) else { return };
        let kind = info.kind;
        let only_update_on_change = info.options.only_update_on_change;

        let Some(state) = self.federates.get_mut(owner) else { return };
        match kind {
            HandleKind::Input => {
                let changed = state
                    .value_buffer(target)
                    .update(delivery_time, payload, only_update_on_change);
                if changed {
                    state.updated_handles.push(target);
                }
            }
            HandleKind::Endpoint => {
                state.endpoint_queue(target).push(delivery_time, payload);
                state.updated_handles.push(target);
            }
            _ => {}
        }
        let dep_msg = ActionMessage::new(action).with_source(source_id, source_handle).with_time(delivery_time);
        let out = state.coordinator.process_message(&dep_msg);
        self.dispatch_local_grant(owner_global, out);
    }

    /// Sends a message out to a remote destination filter via `SEND_FOR_DEST_FILTER_AND_RETURN`,
    /// holding the deposit until `DEST_FILTER_RESULT`/`NULL_DEST_MESSAGE` comes back. The
    /// receiving federate's grant is blocked for as long as this is outstanding (§4.7's
    /// `CMD_TIME_BLOCK`) -- see [`Core::filter_round_trips`].
    fn send_for_remote_dest_filter(
        &mut self,
        target: InterfaceHandle,
        owner: LocalFederateId,
        owner_global: GlobalFederateId,
        filter: GlobalHandle,
        msg: ActionMessage,
    ) {
        let id = self.next_pending_filter_id;
        self.next_pending_filter_id += 1;
        *self.filter_round_trips.entry(owner_global).or_insert(0) += 1;
        self.pending_dest_filter.insert(
            id,
            PendingDestFilter {
                target,
                owner,
                owner_global,
                action: msg.action,
                source_id: msg.source_id,
                source_handle: msg.source_handle,
                action_time: msg.action_time,
            },
        );
        let target_global = self.handles.get(target).map(|h| h.global).unwrap_or(GlobalHandle::new(
            owner_global,
            target,
        ));
        let mut out = ActionMessage::new(ActionCode::SendForDestFilterAndReturn)
            .with_source(target_global.federate, target_global.handle)
            .with_dest(filter.federate, filter.handle)
            .with_time(msg.action_time)
            .with_payload(msg.payload);
        out.message_id = id;
        self.route_or_deliver(out);
    }

    /// Runs a `SEND_FOR_DEST_FILTER_AND_RETURN` request against a locally-owned filter and
    /// bounces the result (`DEST_FILTER_RESULT` or, if the filter dropped the message,
    /// `NULL_DEST_MESSAGE`) back to the requesting Core.
    fn handle_dest_filter_request(&mut self, msg: ActionMessage) {
        let Some(filter_handle) = self.handles.find_global(GlobalHandle::new(msg.dest_id, msg.dest_handle)) else {
            return;
        };
        let Some(entry) = self.filters.get(&filter_handle) else {
            return;
        };
        let delay = entry.info.delay;
        let transformed = match entry.operator() {
            Some(op) => op.process(&msg.payload),
            None => Some(msg.payload.clone()),
        };
        let filter_global = self.handles.get(filter_handle).map(|h| h.global).unwrap_or(GlobalHandle::new(
            msg.dest_id,
            msg.dest_handle,
        ));
        let mut reply = match transformed {
            Some(payload) => ActionMessage::new(ActionCode::DestFilterResult)
                .with_source(filter_global.federate, filter_global.handle)
                .with_dest(msg.source_id, msg.source_handle)
                .with_time(delay)
                .with_payload(payload),
            None => ActionMessage::new(ActionCode::NullDestMessage)
                .with_source(filter_global.federate, filter_global.handle)
                .with_dest(msg.source_id, msg.source_handle)
                .with_time(delay),
        };
        reply.message_id = msg.message_id;
        self.route_or_deliver(reply);
    }

    /// Handles the `DEST_FILTER_RESULT`/`NULL_DEST_MESSAGE` reply to a destination-filter round
    /// trip this Core started: finishes the deferred deposit (`msg.action_time` carries the
    /// filter's delay) and releases the receiving federate's grant if nothing else is still
    /// outstanding.
    fn handle_dest_filter_result(&mut self, msg: ActionMessage, delivered: bool) {
        let Some(pending) = self.pending_dest_filter.remove(&msg.message_id) else {
            return;
        };
        if let Some(count) = self.filter_round_trips.get_mut(&pending.owner_global) {
            *count = count.saturating_sub(1);
        }
        if delivered {
            self.finish_local_delivery(
                pending.target,
                pending.owner,
                pending.owner_global,
                pending.action,
                pending.source_id,
                pending.source_handle,
                pending.action_time + msg.action_time,
                msg.payload,
            );
        }
        self.maybe_release_blocked_grant(pending.owner_global);
    }

    /// Releases a grant withheld in [`Self::blocked_grants`] once `global_id` has no outstanding
    /// cross-core filter round trips left.
    fn maybe_release_blocked_grant(&mut self, global_id: GlobalFederateId) {
        if self.filter_round_trips.get(&global_id).copied().unwrap_or(0) > 0 {
            return;
        }
        if let Some((m, reply)) = self.blocked_grants.remove(&global_id) {
            let _ = reply.send(Ok(GrantResult {
                granted_time: m.action_time,
                iteration_complete: m.flags.contains(ActionFlags::PROCESSING_COMPLETE),
            }));
        }
    }

    /// Resolves `global_id`'s own pending grant if feeding a local value/message dependency
    /// update into its per-federate coordinator unblocked one. A per-federate coordinator is
    /// always [`CoordinatorKind::Federate`], which never produces a `to_parent` relay, so there
    /// is nothing else to do with its output.
    fn dispatch_local_grant(&mut self, global_id: GlobalFederateId, out: CoordinatorOutput) {
        for m in out.to_dependents {
            if m.action == ActionCode::ExecGrant || m.action == ActionCode::TimeGrant {
                if let Some(reply) = self.grant_waiters.remove(&global_id) {
                    let _ = reply.send(Ok(GrantResult {
                        granted_time: m.action_time,
                        iteration_complete: m.flags.contains(ActionFlags::PROCESSING_COMPLETE),
                    }));
                }
            }
        }
    }

    /// Runs `endpoint`'s local destination filter chain, returning the transformed payload and
    /// the accumulated delay every filter in the chain adds to the message's delivery time
    /// (§4.7). Filters wired to a different Core are not in this chain -- see
    /// [`Self::remote_dest_filters`] and [`Self::send_for_remote_dest_filter`].
    fn apply_destination_filters(&self, endpoint: InterfaceHandle, payload: Vec<u8>) -> (Vec<u8>, Time) {
        run_filter_chain(self.dest_chain.get(&endpoint), &self.filters, payload)
    }

    /// Runs `endpoint`'s local source filter chain (applied to messages leaving the endpoint),
    /// same contract as [`Self::apply_destination_filters`].
    fn apply_source_filters(&self, endpoint: InterfaceHandle, payload: Vec<u8>) -> (Vec<u8>, Time) {
        run_filter_chain(self.source_chain.get(&endpoint), &self.filters, payload)
    }

    fn enter_executing_mode(
        &mut self,
        federate: LocalFederateId,
        iterating: bool,
        reply: oneshot::Sender<Result<GrantResult>>,
    ) {
        let Some(state) = self.federates.get_mut(federate) else {
            let _ = reply.send(Err(BrokerError::new(
                cosim_core::ErrorKind::InvalidIdentifier,
                "unknown federate",
            )));
            return;
        };
        state.transition(FederateLifecycle::Initializing);
        let global_id = state.global_id;
        let _ = state.coordinator.enter_exec_request(iterating);
        self.stash_grant_reply(global_id, reply);
        self.feed_upstream_exec(global_id, iterating);
        self.maybe_send_init();
    }

    fn time_request(
        &mut self,
        federate: LocalFederateId,
        time: Time,
        iterating: bool,
        reply: oneshot::Sender<Result<GrantResult>>,
    ) {
        let Some(state) = self.federates.get_mut(federate) else {
            let _ = reply.send(Err(BrokerError::new(
                cosim_core::ErrorKind::InvalidIdentifier,
                "unknown federate",
            )));
            return;
        };
        state.next_allowed_send_time = time;
        let global_id = state.global_id;
        let _ = state.coordinator.time_request(time, time, iterating);
        self.stash_grant_reply(global_id, reply);
        self.feed_upstream_time(global_id, time, iterating);
    }

    fn stash_grant_reply(&mut self, global_id: GlobalFederateId, reply: oneshot::Sender<Result<GrantResult>>) {
        self.grant_waiters.insert(global_id, reply);
    }

    /// Feeds one hosted federate's exec-entry request into the Core-wide upstream coordinator:
    /// the first federate to ask kicks off the Core's own request, every federate after that is
    /// folded in as a dependency update, and only once every hosted federate has asked does the
    /// Core relay upward and release the grant to all of them at once.
    fn feed_upstream_exec(&mut self, global_id: GlobalFederateId, iterating: bool) {
        if !self.upstream.is_awaiting_exec_grant() {
            let out = self.upstream.enter_exec_request(iterating);
            self.dispatch_upstream_output(out);
        }
        let mut synthetic = ActionMessage::new(ActionCode::ExecRequest).with_source(global_id, 0usize.into());
        if iterating {
            synthetic.flags.set(ActionFlags::ITERATION_REQUESTED);
        }
        let out = self.upstream.process_message(&synthetic);
        self.dispatch_upstream_output(out);
    }

    fn feed_upstream_time(&mut self, global_id: GlobalFederateId, time: Time, iterating: bool) {
        if !self.upstream.is_awaiting_time_grant() {
            let out = self.upstream.time_request(time, time, iterating);
            self.dispatch_upstream_output(out);
        }
        let mut synthetic = ActionMessage::new(ActionCode::TimeRequest).with_source(global_id, 0usize.into());
        if iterating {
            synthetic.flags.set(ActionFlags::ITERATION_REQUESTED);
        }
        synthetic.action_time = time;
        synthetic.te = time;
        let out = self.upstream.process_message(&synthetic);
        self.dispatch_upstream_output(out);
    }

    /// Releases a grant produced by [`Self::upstream`] to every federate currently waiting on
    /// one, and relays any resulting upstream request to the parent. Before `INIT_GRANT` has
    /// been received the grant is held in [`Self::pending_local_grant`] instead -- see its doc
    /// comment.
    fn dispatch_upstream_output(&mut self, out: CoordinatorOutput) {
        for m in out.to_dependents {
            if m.action == ActionCode::ExecGrant || m.action == ActionCode::TimeGrant {
                if self.operating {
                    self.release_grant(&m);
                } else {
                    self.pending_local_grant = Some(m);
                }
            }
        }
        if let Some(to_parent) = out.to_parent {
            self.send_to_parent(to_parent);
        }
    }

    /// Releases a grant to every waiting federate, except one with an outstanding cross-core
    /// filter round trip (§4.7): that federate's reply is held in [`Self::blocked_grants`] and
    /// released later by [`Self::maybe_release_blocked_grant`].
    fn release_grant(&mut self, m: &ActionMessage) {
        let waiting: Vec<GlobalFederateId> = self.grant_waiters.keys().copied().collect();
        for global_id in waiting {
            let Some(reply) = self.grant_waiters.remove(&global_id) else {
                continue;
            };
            if self.filter_round_trips.get(&global_id).copied().unwrap_or(0) > 0 {
                self.blocked_grants.insert(global_id, (m.clone(), reply));
                continue;
            }
            let _ = reply.send(Ok(GrantResult {
                granted_time: m.action_time,
                iteration_complete: m.flags.contains(ActionFlags::PROCESSING_COMPLETE),
            }));
        }
    }

    fn maybe_send_init(&mut self) {
        if self.init_sent {
            return;
        }
        let all_ready = !self.federates.is_empty()
            && self
                .federates
                .iter()
                .all(|(_, f)| f.lifecycle != FederateLifecycle::Created);
        if all_ready {
            self.init_sent = true;
            self.send_to_parent(ActionMessage::new(ActionCode::Init).with_source(self.own_id, 0usize.into()));
        }
    }

    fn query(&mut self, query: String, reply: oneshot::Sender<Result<String>>) {
        if let Some(answer) = self.answer_local_query(&query) {
            let _ = reply.send(Ok(answer));
            return;
        }
        let (qid, rx) = self.queries.allocate();
        let mut msg = ActionMessage::new(ActionCode::Query)
            .with_source(self.own_id, 0usize.into())
            .with_string_data([query]);
        msg.message_id = qid_to_message_id(qid);
        self.send_to_parent(msg);
        tokio::spawn(async move {
            let _ = reply.send(rx.await.map_err(BrokerError::from));
        });
    }

    fn answer_local_query(&self, query: &str) -> Option<String> {
        match query {
            "name" => Some(format!("\"{}\"", self.config.name)),
            "isinit" => Some(self.operating.to_string()),
            "federates" => {
                let names: Vec<&str> = self.federates.iter().map(|(_, f)| f.name.as_str()).collect();
                serde_json::to_string(&names).ok()
            }
            _ => None,
        }
    }

    /// Answers a `federate_map`/`dependency_graph` query fanned out from a parent Broker (§4.3's
    /// `MapBuilder`): this Core is a leaf, so its contribution lists its own hosted federates by
    /// name, global id and parent id directly rather than recursing further.
    fn federate_map_json(&self) -> String {
        let mut federates = serde_json::Map::new();
        for (_, f) in self.federates.iter() {
            federates.insert(
                f.name.clone(),
                serde_json::json!({ "id": f.global_id.to_string(), "parent": self.own_id.to_string() }),
            );
        }
        serde_json::json!({ "name": self.config.name, "id": self.own_id.to_string(), "federates": federates })
            .to_string()
    }

    /// Handles a `CMD_QUERY` arriving from the parent broker's aggregate fan-out: answers
    /// immediately and echoes `message_id` back for the broker's `MapBuilder` correlation.
    fn handle_query_from_parent(&mut self, msg: ActionMessage) {
        let Some(query_str) = msg.string_data.first().cloned() else {
            return;
        };
        let answer = match self.answer_local_query(&query_str) {
            Some(a) => a,
            None if query_str == "federate_map" || query_str == "dependency_graph" => self.federate_map_json(),
            None => "null".to_string(),
        };
        let mut reply = ActionMessage::new(ActionCode::QueryReply).with_string_data([answer]);
        reply.message_id = msg.message_id;
        reply.counter = msg.counter;
        self.send_to_parent(reply);
    }

    fn disconnect_federate(&mut self, federate: LocalFederateId) {
        let Some(state) = self.federates.get_mut(federate) else { return };
        state.transition(FederateLifecycle::Finished);
        let global_id = state.global_id;
        let out = self.upstream.disconnect_dependency(global_id);
        self.dispatch_upstream_output(out);
        let msg = ActionMessage::new(ActionCode::Disconnect).with_source(global_id, 0usize.into());
        self.send_to_parent(msg);
    }

    // ---- wire message handling --------------------------------------------------------------

    fn handle_wire_message(&mut self, msg: ActionMessage) {
        match msg.action {
            ActionCode::BrokerAck => self.handle_broker_ack(msg),
            ActionCode::FedAck => self.handle_fed_ack(msg),
            ActionCode::InitGrant => self.handle_init_grant(msg),
            ActionCode::AddSubscriber | ActionCode::AddPublisher => self.handle_add_pair(msg),
            ActionCode::Error => self.handle_registration_error(msg),
            ActionCode::Pub | ActionCode::SendMessage => self.route_or_deliver(msg),
            ActionCode::SendForDestFilterAndReturn => self.handle_dest_filter_request(msg),
            ActionCode::DestFilterResult => self.handle_dest_filter_result(msg, true),
            ActionCode::NullDestMessage => self.handle_dest_filter_result(msg, false),
            ActionCode::SendForFilterAndReturn => self.handle_source_filter_request(msg),
            ActionCode::FilterResult => self.handle_source_filter_result(msg, true),
            ActionCode::NullMessage => self.handle_source_filter_result(msg, false),
            ActionCode::QueryReply => {
                let qid = message_id_to_qid(msg.message_id);
                let answer = msg.string_data.into_iter().next().unwrap_or_default();
                self.queries.fulfill(qid, answer);
            }
            ActionCode::Query => self.handle_query_from_parent(msg),
            ActionCode::ExecRequest | ActionCode::ExecGrant | ActionCode::TimeRequest | ActionCode::TimeGrant => {
                self.handle_timing_from_parent(msg);
            }
            ActionCode::Disconnect | ActionCode::DisconnectName | ActionCode::PriorityDisconnect => {
                self.handle_disconnect_from_parent(msg);
            }
            _ => {
                tracing::trace!(action = ?msg.action, "unhandled wire message at core");
            }
        }
    }

    fn handle_broker_ack(&mut self, msg: ActionMessage) {
        self.own_id = msg.dest_id;
        self.upstream = TimeCoordinator::new(self.own_id, CoordinatorKind::Forwarding);
        tracing::info!(id = %self.own_id, "core registered with parent");
    }

    fn handle_fed_ack(&mut self, msg: ActionMessage) {
        let correlation_id = msg.message_id;
        let Some((local_id, _name)) = self.pending_fed_register.remove(&correlation_id) else {
            return;
        };
        let Some(reply) = self.fed_ack_waiters.remove(&correlation_id) else {
            return;
        };
        if msg.flags.contains(ActionFlags::ERROR) {
            let _ = reply.send(Err(BrokerError::new(
                cosim_core::ErrorKind::RegistrationFailure,
                "federate registration rejected",
            )));
            return;
        }
        if let Some(state) = self.federates.get_mut(local_id) {
            state.assign_global_id(msg.dest_id);
            state
                .coordinator
                .set_max_iteration_count(self.max_iteration_default);
            self.routing.set_route(msg.dest_id, RouteId::PARENT);
            self.upstream.add_dependency(msg.dest_id);
            self.upstream.add_dependent(msg.dest_id);
        }
        let _ = reply.send(Ok(local_id));
    }

    fn handle_init_grant(&mut self, _msg: ActionMessage) {
        self.operating = true;
        if let Some(grant) = self.pending_local_grant.take() {
            self.release_grant(&grant);
        }
        for endpoint in self.dest_chain.keys().copied().collect::<Vec<_>>() {
            let mut infos: Vec<FilterInfo> = self.source_chain_infos(&endpoint, false);
            let _ = validate_destination_chain(&infos);
            let endpoint_type = self
                .handles
                .get(endpoint)
                .map(|h| h.interface_type.clone())
                .unwrap_or_default();
            organize_filter_operations(&mut infos, &endpoint_type);
        }
        for endpoint in self.source_chain.keys().copied().collect::<Vec<_>>() {
            let mut infos: Vec<FilterInfo> = self.source_chain_infos(&endpoint, true);
            let endpoint_type = self
                .handles
                .get(endpoint)
                .map(|h| h.interface_type.clone())
                .unwrap_or_default();
            let mismatched = organize_filter_operations(&mut infos, &endpoint_type);
            for handle in mismatched {
                tracing::warn!(?handle, "source filter chain type mismatch");
            }
        }
        tracing::info!(name = %self.config.name, "core entered operating mode");
    }

    fn source_chain_infos(&self, endpoint: &InterfaceHandle, source: bool) -> Vec<FilterInfo> {
        let chain = if source {
            self.source_chain.get(endpoint)
        } else {
            self.dest_chain.get(endpoint)
        };
        chain
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| self.filters.get(h).map(|e| e.info.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handles an `ADD_SUBSCRIBER`/`ADD_PUBLISHER` ack, wiring a resolved target into the local
    /// handle it names. For a filter/endpoint pairing (tagged with `EXTRA1` by
    /// `Broker::resolve_named_target`), both sides learn about the other even when the
    /// counterpart lives on a different Core: the filter's own Core records its placement, and
    /// the endpoint's Core records the filter as a remote chain stage (§4.7).
    fn handle_add_pair(&mut self, msg: ActionMessage) {
        let Some(handle) = self.handles.find_global(GlobalHandle::new(msg.dest_id, msg.dest_handle)) else {
            return;
        };
        let counterpart = GlobalHandle::new(msg.source_id, msg.source_handle);
        let info = self.handles.get(handle).cloned();
        self.handle_targets.add(handle, counterpart);
        let is_filter_pairing = msg.flags.contains(ActionFlags::EXTRA1);
        let placement = if msg.counter == 1 {
            FilterPlacement::Destination
        } else {
            FilterPlacement::Source
        };
        if let Some(info) = info {
            match info.kind {
                HandleKind::Filter => {
                    if let Some(entry) = self.filters.get_mut(&handle) {
                        entry.info.placement = placement;
                    }
                    if let Some(endpoint) = self.handles.find_global(counterpart) {
                        let chain = match placement {
                            FilterPlacement::Source => self.source_chain.entry(endpoint).or_default(),
                            FilterPlacement::Destination => self.dest_chain.entry(endpoint).or_default(),
                        };
                        if !chain.contains(&handle) {
                            chain.push(handle);
                        }
                    }
                }
                HandleKind::Endpoint if is_filter_pairing => {
                    let chain = match placement {
                        FilterPlacement::Source => self.remote_source_filters.entry(handle).or_default(),
                        FilterPlacement::Destination => self.remote_dest_filters.entry(handle).or_default(),
                    };
                    if !chain.contains(&counterpart) {
                        chain.push(counterpart);
                    }
                }
                _ => {}
            }
        }
        self.routing.learn_name(HandleKind::Publication, "", counterpart);
    }

    fn handle_registration_error(&mut self, msg: ActionMessage) {
        let Some(handle) = self.handles.find_global(GlobalHandle::new(msg.dest_id, msg.dest_handle)) else {
            for (_, state) in self.federates.iter_mut() {
                if state.global_id == msg.dest_id {
                    state.transition(FederateLifecycle::Error);
                }
            }
            return;
        };
        if let Some(info) = self.handles.get(handle) {
            let owner = info.owner;
            if let Some(state) = self.federates.get_mut(owner) {
                state.transition(FederateLifecycle::Error);
                if let Some(reply) = self.grant_waiters.remove(&state.global_id) {
                    let _ = reply.send(Err(BrokerError::new(
                        cosim_core::ErrorKind::RegistrationFailure,
                        "required target could not be resolved",
                    )));
                }
            }
        }
    }

    /// The real upstream grant for a request [`Self::upstream`] already answered optimistically
    /// (its `to_dependents` grant fires in the same call that mirrors the request to the parent).
    /// By the time this arrives every hosted federate has already been released; there is
    /// nothing further to do.
    fn handle_timing_from_parent(&mut self, msg: ActionMessage) {
        tracing::trace!(action = ?msg.action, "parent confirmed an already-applied grant");
    }

    fn handle_disconnect_from_parent(&mut self, _msg: ActionMessage) {
        tracing::info!("core notified of upstream disconnect");
    }
}

fn qid_to_message_id(qid: QueryId) -> i64 {
    qid.index() as i64
}

fn message_id_to_qid(id: i64) -> QueryId {
    QueryId::from(id.max(0) as u64)
}
