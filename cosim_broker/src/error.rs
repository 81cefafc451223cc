//! Crate-level error type for the Broker/Core runtimes, mirroring [`cosim_runtime::RuntimeError`]:
//! one `thiserror` enum at the root, carrying a [`cosim_core::ErrorKind`] for callers that want to
//! match on failure category rather than parse messages.

use cosim_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("{kind}: {message}")]
    Federation { kind: ErrorKind, message: String },

    #[error(transparent)]
    Runtime(#[from] cosim_runtime::RuntimeError),

    #[error(transparent)]
    Transport(#[from] cosim_transport::TransportError),

    #[error("processing task is no longer running")]
    ProcessingTaskGone,
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Federation { kind, .. } => *kind,
            BrokerError::Runtime(e) => e.kind(),
            BrokerError::Transport(_) => ErrorKind::ConnectionFailure,
            BrokerError::ProcessingTaskGone => ErrorKind::SystemFailure,
        }
    }

    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BrokerError::Federation {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
