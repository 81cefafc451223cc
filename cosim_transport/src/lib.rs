//! Transport contract and the in-process transport that implements it.
//!
//! Everything above this crate (`cosim_broker`'s `Core` and `Broker`) talks to its peers only
//! through the [`Transport`] trait and addresses them only by [`cosim_core::RouteId`]; nothing
//! here, or above it, assumes the peer is in the same process. The only implementation shipped is
//! [`InprocTransport`], which is enough to run a whole federation inside one process -- the common
//! case for tests and for embedding -- and it is what [`ParticipantDirectory`] exists to wire up.
//! A networked transport would implement [`Transport`] the same way and be handed to a Core or
//! Broker in place of `InprocTransport`, without changing routing or timing logic at all.
#![deny(clippy::all)]

pub mod directory;
pub mod error;
pub mod inproc;
pub mod route;

pub use directory::{ParticipantDirectory, ParticipantHandle, DIRECTORY};
pub use error::TransportError;
pub use inproc::InprocTransport;
pub use route::{RouteInfo, RouteTable, Transport};
