//! Broker and Core processing runtimes: the two concrete participant kinds in a `cosim`
//! federation tree, each a single `tokio` task that owns its state exclusively and exchanges
//! [`cosim_runtime::ActionMessage`]s with its parent and children over [`cosim_transport`] routes.
//!
//! [`core::Core`] is a leaf: it hosts federates directly. [`broker::Broker`] is everything above
//! a leaf: it resolves names, forwards what it cannot resolve, and aggregates the time-handshake
//! for the subtree beneath it. Both share [`routing`]'s `RoutingTable`/`CorrelationTable` and the
//! same dispatch-by-`ActionCode` processing-loop shape.
#![deny(clippy::all)]

pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod routing;

pub use broker::{Broker, BrokerHandle};
pub use config::{BrokerConfig, CoreConfig, FederateFlags, FederateInfo, LogLevel};
pub use core::{Core, CoreHandle, GrantResult};
pub use error::{BrokerError, Result};
