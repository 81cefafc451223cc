//! The `ActionMessage` protocol, handle registry, time coordination and per-federate state
//! machine shared by every participant in a `cosim` federation.
//!
//! This crate has no notion of a network or a thread: it is the vocabulary and the pure state
//! machines that [`cosim_broker`](../cosim_broker/index.html)'s `Core` and `Broker` processing
//! tasks drive. Keeping them separate means the timing and filter-ordering logic can be unit
//! tested without spinning up tokio tasks or transports at all.
#![deny(clippy::all)]

pub mod action;
pub mod codec;
pub mod error;
pub mod federate;
pub mod filter;
pub mod handles;
pub mod query;
pub mod sched;

pub use action::{ActionCode, ActionFlags, ActionMessage, CMD_INFO_BASIS, NULL_INFO_COMMAND};
pub use error::{Result, RuntimeError};
pub use federate::{FederateLifecycle, FederateState, MessageQueue, ValueBuffer};
pub use filter::{Airlock, FilterInfo, FilterOperator, FilterOperatorAirlock, FilterPlacement};
pub use handles::{HandleInfo, HandleKind, HandleOptions, HandleRegistry, HandleTargets};
pub use query::{DelayedQueries, MapBuilder, QueryId, WELL_KNOWN_QUERIES};
pub use sched::{CoordinatorKind, CoordinatorOutput, DependencyInfo, TimeCoordinator, TimeState};
