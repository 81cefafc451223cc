//! Transport-level errors. These never carry a [`cosim_core::ErrorKind`] directly -- the owning
//! Core/Broker wraps them into one (typically `ConnectionFailure`) when it surfaces them to a
//! federate or logs them.

use cosim_core::RouteId;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no route registered for route id {0}")]
    UnknownRoute(RouteId),

    #[error("route {0} is closed")]
    RouteClosed(RouteId),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),
}
