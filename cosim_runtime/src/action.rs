//! The `ActionMessage`: the single command record every participant exchanges, whether it is
//! crossing a route or being dispatched locally. Modeled directly on HELICS's `action_t`
//! enumeration, including its numbering, so that priority/timing/dependency classification is a
//! constant-time discriminant match rather than a string comparison.

use cosim_core::{GlobalFederateId, InterfaceHandle, Time};
use serde::{Deserialize, Serialize};

/// Boundary between "compact" commands (no `ExtraInfo` payload) and commands that carry one.
///
/// Mirrors `action_message_def::cmd_info_basis` from the reference numbering.
pub const CMD_INFO_BASIS: i32 = 0x1000_0000;

/// The largest non-priority command that has no extra payload.
pub const NULL_INFO_COMMAND: i32 = CMD_INFO_BASIS - 1;
/// The largest (least negative) priority command that has no extra payload.
pub const PRIORITY_NULL_INFO_COMMAND: i32 = -CMD_INFO_BASIS - 1;

/// The command tag carried by every [`ActionMessage`].
///
/// Discriminants are pinned to the reference numbering wherever one exists; a handful of
/// additional codes (`AddNamed*`/`RemoveNamed*`/`AddSubscriber`/`AddPublisher`) are not part of
/// that numbering and are assigned free slots in the 560-599 range, documented inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ActionCode {
    // --- priority commands: all negative ---
    PriorityDisconnect = -3,
    FedAck = -25,
    BrokerAck = -27,
    AddRoute = -32,
    RouteAck = -16,
    RegisterRoute = -15,
    RegFed = -105,
    PriorityAck = -254,
    Query = -CMD_INFO_BASIS - 37,
    QueryReply = -CMD_INFO_BASIS - 38,
    RegBroker = -CMD_INFO_BASIS - 40,
    ProtocolPriority = -60000,

    // --- non-priority ---
    Ignore = 0,
    Tick = 1,
    Disconnect = 3,
    DisconnectName = 4,
    Ping = 6,
    PingReply = 7,
    Init = 10,
    InitGrant = 11,
    InitNotReady = 12,
    ExecRequest = 20,
    ExecGrant = 22,
    ExecCheck = 24,
    Stop = 30,
    TerminateImmediately = 31,
    TimeGrant = 35,
    TimeCheck = 36,
    RequestCurrentTime = 38,
    TimeBlock = 40,
    TimeUnblock = 41,
    Pub = 45,
    NotifyPub = 50,
    Log = 55,
    NotifySub = 70,
    SendRoute = 75,
    Subscriber = 85,
    NotifyEnd = 90,
    HasOperator = 92,
    SearchDependency = 134,
    AddDependency = 140,
    RemoveDependency = 141,
    AddDependent = 144,
    RemoveDependent = 145,
    AddInterdependency = 148,
    RemoveInterdependency = 149,
    FedConfigure = 205,
    CoreConfigure = 207,
    Ack = 254,
    TimeRequest = 500,

    // extension codes: not part of the reference numbering, kept in a free slot range so they
    // never collide with it.
    AddNamedPublication = 560,
    AddNamedInput = 561,
    AddNamedEndpoint = 562,
    AddNamedFilter = 563,
    RemoveNamedTarget = 564,
    AddSubscriber = 565,
    AddPublisher = 566,

    NullMessage = 726,
    NullDestMessage = 730,
    Bye = 2000,
    Protocol = 60000,
    UpdateFilterOp = 10427,
    Warning = 9990,
    Error = 10000,
    Invalid = 1_010_101,

    SendMessage = CMD_INFO_BASIS + 20,
    SendForFilter = CMD_INFO_BASIS + 30,
    SendForDestFilterAndReturn = CMD_INFO_BASIS + 31,
    SendForFilterAndReturn = CMD_INFO_BASIS + 35,
    FilterResult = CMD_INFO_BASIS + 40,
    DestFilterResult = CMD_INFO_BASIS + 41,
    RegPub = CMD_INFO_BASIS + 50,
    RegDstFilter = CMD_INFO_BASIS + 60,
    NotifyDstFilter = CMD_INFO_BASIS + 62,
    RegSub = CMD_INFO_BASIS + 70,
    RegSrcFilter = CMD_INFO_BASIS + 80,
    NotifySrcFilter = CMD_INFO_BASIS + 82,
    RegEnd = CMD_INFO_BASIS + 90,
    ProtocolBig = CMD_INFO_BASIS + 60000,
}

impl ActionCode {
    pub fn raw(&self) -> i32 {
        *self as i32
    }

    /// Priority commands bypass the FIFO queue and are always dispatched first.
    pub fn is_priority(&self) -> bool {
        self.raw() < 0
    }

    /// Whether this command carries the (time, Te, Tdemin, Tso) timing fields meaningfully.
    pub fn is_timing(&self) -> bool {
        matches!(
            self,
            ActionCode::Init
                | ActionCode::InitGrant
                | ActionCode::InitNotReady
                | ActionCode::ExecRequest
                | ActionCode::ExecGrant
                | ActionCode::ExecCheck
                | ActionCode::TimeRequest
                | ActionCode::TimeGrant
                | ActionCode::TimeCheck
                | ActionCode::RequestCurrentTime
                | ActionCode::TimeBlock
                | ActionCode::TimeUnblock
        )
    }

    /// Whether this command mutates the dependency graph.
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            ActionCode::SearchDependency
                | ActionCode::AddDependency
                | ActionCode::RemoveDependency
                | ActionCode::AddDependent
                | ActionCode::RemoveDependent
                | ActionCode::AddInterdependency
                | ActionCode::RemoveInterdependency
        )
    }

    /// Whether this command signals a participant or federate leaving the federation.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ActionCode::Disconnect | ActionCode::DisconnectName | ActionCode::PriorityDisconnect
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ActionCode::Error | ActionCode::Warning)
    }

    /// Commands whose routing failure should be silently dropped rather than logged: the peer
    /// they were headed for is, functionally, already gone.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            ActionCode::Disconnect
                | ActionCode::DisconnectName
                | ActionCode::PriorityDisconnect
                | ActionCode::Error
                | ActionCode::Log
                | ActionCode::TimeRequest
        )
    }

    /// Whether this is a recognized, non-`Invalid` command.
    pub fn is_valid(&self) -> bool {
        !matches!(self, ActionCode::Invalid)
    }

    /// Whether commands of this kind carry an `ExtraInfo`-style payload (string data / extended
    /// time fields) rather than the compact header-only form.
    pub fn has_info(&self) -> bool {
        self.raw() > NULL_INFO_COMMAND || self.raw() < PRIORITY_NULL_INFO_COMMAND
    }
}

/// Per-message flag bitfield. Bit positions match `action_message_flags`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ActionFlags(u16);

impl ActionFlags {
    pub const ITERATION_REQUESTED: ActionFlags = ActionFlags(1 << 0);
    pub const PROCESSING_COMPLETE: ActionFlags = ActionFlags(1 << 1);
    pub const REQUIRED: ActionFlags = ActionFlags(1 << 2);
    pub const ERROR: ActionFlags = ActionFlags(1 << 4);
    pub const INDICATOR: ActionFlags = ActionFlags(1 << 5);
    pub const EXTRA1: ActionFlags = ActionFlags(1 << 7);
    pub const FORWARDING_COORDINATOR: ActionFlags = ActionFlags(1 << 8);
    pub const CLONE: ActionFlags = ActionFlags(1 << 9);
    pub const DESTINATION_PROCESSING: ActionFlags = ActionFlags(1 << 11);
    pub const BROKER_MIN_TIME: ActionFlags = ActionFlags(1 << 12);

    pub fn empty() -> Self {
        ActionFlags(0)
    }

    pub fn contains(&self, other: ActionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: ActionFlags) {
        self.0 |= other.0;
    }

    pub fn unset(&mut self, other: ActionFlags) {
        self.0 &= !other.0;
    }

    pub fn with(mut self, other: ActionFlags) -> Self {
        self.set(other);
        self
    }
}

/// The universal command record.
///
/// Field layout mirrors the reference `ActionMessage` class: a fixed header (action, ids,
/// handles, counter, flags, sequence id, and the four time fields) plus an optional payload and
/// an optional vector of string-data fields, used by registration/query/log commands to carry
/// names and JSON blobs without growing the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub action: ActionCode,
    /// Sequence number, or an echo of one for reply commands.
    pub message_id: i64,
    pub source_id: GlobalFederateId,
    pub source_handle: InterfaceHandle,
    pub dest_id: GlobalFederateId,
    pub dest_handle: InterfaceHandle,
    /// Iteration count, or the filter-chain index for in-flight filter round trips.
    pub counter: u16,
    pub flags: ActionFlags,
    pub sequence_id: u32,
    /// The command's primary time value (a grant, a request, a publish timestamp, ...).
    pub action_time: Time,
    /// Earliest next event the sender knows about.
    pub te: Time,
    /// Minimum event time among the sender's dependents.
    pub tdemin: Time,
    /// Second-order minimum, used by forwarding coordinators.
    pub tso: Time,
    pub payload: Vec<u8>,
    pub string_data: Vec<String>,
}

impl ActionMessage {
    /// Builds a minimal, time-zero command with no payload -- the starting point for every
    /// constructor below.
    pub fn new(action: ActionCode) -> Self {
        Self {
            action,
            message_id: 0,
            source_id: GlobalFederateId::INVALID,
            source_handle: InterfaceHandle::from(0usize),
            dest_id: GlobalFederateId::INVALID,
            dest_handle: InterfaceHandle::from(0usize),
            counter: 0,
            flags: ActionFlags::empty(),
            sequence_id: 0,
            action_time: Time::ZERO,
            te: Time::ZERO,
            tdemin: Time::ZERO,
            tso: Time::ZERO,
            payload: Vec::new(),
            string_data: Vec::new(),
        }
    }

    pub fn with_source(mut self, id: GlobalFederateId, handle: InterfaceHandle) -> Self {
        self.source_id = id;
        self.source_handle = handle;
        self
    }

    pub fn with_dest(mut self, id: GlobalFederateId, handle: InterfaceHandle) -> Self {
        self.dest_id = id;
        self.dest_handle = handle;
        self
    }

    pub fn with_time(mut self, time: Time) -> Self {
        self.action_time = time;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_string_data(mut self, strings: impl IntoIterator<Item = String>) -> Self {
        self.string_data = strings.into_iter().collect();
        self
    }

    pub fn set_source(&mut self, id: GlobalFederateId, handle: InterfaceHandle) {
        self.source_id = id;
        self.source_handle = handle;
    }

    pub fn set_dest(&mut self, id: GlobalFederateId, handle: InterfaceHandle) {
        self.dest_id = id;
        self.dest_handle = handle;
    }

    /// Swaps source and destination in place -- used when bouncing a command back to its
    /// originator (filter returns, acks).
    pub fn swap_source_dest(&mut self) {
        std::mem::swap(&mut self.source_id, &mut self.dest_id);
        std::mem::swap(&mut self.source_handle, &mut self.dest_handle);
    }

    pub fn is_priority(&self) -> bool {
        self.action.is_priority()
    }

    pub fn is_timing(&self) -> bool {
        self.action.is_timing()
    }

    pub fn is_dependency(&self) -> bool {
        self.action.is_dependency()
    }

    pub fn is_disconnect(&self) -> bool {
        self.action.is_disconnect()
    }

    pub fn is_error(&self) -> bool {
        self.action.is_error()
    }

    pub fn is_ignorable(&self) -> bool {
        self.action.is_ignorable()
    }

    pub fn is_valid(&self) -> bool {
        self.action.is_valid()
    }

    /// A JSON rendering reserved for queries and log lines; never sent on a value/message route.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_string(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl PartialOrd for ActionMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.action_time.partial_cmp(&other.action_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_commands_are_negative() {
        assert!(ActionCode::Query.is_priority());
        assert!(ActionCode::FedAck.is_priority());
        assert!(!ActionCode::TimeRequest.is_priority());
    }

    #[test]
    fn ignore_is_the_zero_command() {
        assert_eq!(ActionCode::Ignore.raw(), 0);
    }

    #[test]
    fn ordering_follows_action_time() {
        let a = ActionMessage::new(ActionCode::Pub).with_time(Time::from_seconds(1.0));
        let b = ActionMessage::new(ActionCode::Pub).with_time(Time::from_seconds(2.0));
        assert!(a < b);
    }

    #[test]
    fn swap_source_dest_round_trips() {
        let mut m = ActionMessage::new(ActionCode::SendMessage)
            .with_source(GlobalFederateId::from(1), InterfaceHandle::from(2usize))
            .with_dest(GlobalFederateId::from(3), InterfaceHandle::from(4usize));
        m.swap_source_dest();
        assert_eq!(m.source_id, GlobalFederateId::from(3));
        assert_eq!(m.dest_id, GlobalFederateId::from(1));
    }
}
