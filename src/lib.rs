//! `cosim` federates independent simulators into one logical-time computation: a tree of
//! [`Broker`]s routes names and coordinates time, [`Core`]s host the federates themselves.
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
//!
//! This crate is a thin facade over its workspace members -- [`cosim_core`] (ids, time, error
//! taxonomy), [`cosim_runtime`] (the wire protocol, the federate-side scheduler, filters, queries)
//! and [`cosim_broker`] (the Broker/Core processing tasks). Application code normally only needs
//! the re-exports below; the `runner` feature additionally provides a standalone binary entry
//! point for running a single broker or core as its own OS process.

#[cfg(feature = "runner")]
pub mod runner;

pub use cosim_broker::{
    Broker, BrokerConfig, BrokerError, BrokerHandle, Core, CoreConfig, CoreHandle, FederateFlags,
    FederateInfo, GrantResult, LogLevel,
};
pub use cosim_broker::Result;
pub use cosim_core::{ErrorKind, GlobalFederateId, GlobalHandle, InterfaceHandle, LocalFederateId, RouteId, Time};
pub use cosim_runtime::{ActionCode, ActionMessage, FilterOperator, FilterPlacement, HandleKind};
