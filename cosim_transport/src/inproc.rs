//! The only transport implemented in this crate: every route is a Tokio unbounded MPSC sender
//! into some other in-process participant's inbound queue. A federation that lives entirely in
//! one process (the common case for tests and for embedding cosim in a larger Rust program) never
//! needs anything heavier than this.

use cosim_core::RouteId;
use cosim_runtime::{ActionCode, ActionMessage};

use crate::error::TransportError;
use crate::route::{RouteInfo, RouteTable, Transport};

/// A route table addressed entirely by in-process channels.
#[derive(Default)]
pub struct InprocTransport {
    routes: RouteTable,
}

impl InprocTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for InprocTransport {
    fn add_route(&mut self, route: RouteId, info: RouteInfo) {
        tracing::debug!(route = %route, "route added");
        self.routes.add_route(route, info);
    }

    fn remove_route(&mut self, route: RouteId) {
        tracing::debug!(route = %route, "route removed");
        self.routes.remove_route(route);
    }

    fn transmit(&self, route: RouteId, message: ActionMessage) -> Result<(), TransportError> {
        match self.routes.get(route) {
            Some(RouteInfo::Inproc(sender)) => sender
                .send(message)
                .map_err(|_| TransportError::RouteClosed(route)),
            None => Err(TransportError::UnknownRoute(route)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transmit_delivers_into_the_paired_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut transport = InprocTransport::new();
        transport.add_route(RouteId::PARENT, RouteInfo::Inproc(tx));

        transport
            .transmit(RouteId::PARENT, ActionMessage::new(ActionCode::Ignore))
            .unwrap();

        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn transmitting_on_an_unknown_route_is_an_error() {
        let transport = InprocTransport::new();
        let err = transport
            .transmit(RouteId::PARENT, ActionMessage::new(ActionCode::Ignore))
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownRoute(_)));
    }

    #[tokio::test]
    async fn transmitting_after_the_receiver_drops_is_an_error() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut transport = InprocTransport::new();
        transport.add_route(RouteId::PARENT, RouteInfo::Inproc(tx));

        let err = transport
            .transmit(RouteId::PARENT, ActionMessage::new(ActionCode::Ignore))
            .unwrap_err();
        assert!(matches!(err, TransportError::RouteClosed(_)));
    }
}
