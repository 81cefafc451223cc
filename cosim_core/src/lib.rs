//! Identifier and time types shared by every `cosim` crate.
//!
//! Nothing in here owns a runtime thread or touches the network; it is the vocabulary the rest
//! of the federation core is written against.
#![deny(clippy::all)]

pub mod error;
pub mod ids;
pub mod time;

pub use error::ErrorKind;
pub use ids::{GlobalFederateId, GlobalHandle, InterfaceHandle, LocalFederateId, RouteId};
pub use time::Time;
