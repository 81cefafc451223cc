//! Crate-level error type, mirroring `RuntimeError` in the teacher runtime crate: one
//! `thiserror`-derived enum at the root, carrying a [`cosim_core::ErrorKind`] so callers can
//! match on kind instead of parsing messages.

use cosim_core::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{kind}: {message}")]
    Federation { kind: ErrorKind, message: String },

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("query reply channel closed before an answer arrived")]
    QueryChannelClosed(#[from] tokio::sync::oneshot::error::RecvError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Federation { kind, .. } => *kind,
            RuntimeError::Codec(_) => ErrorKind::SystemFailure,
            RuntimeError::QueryChannelClosed(_) => ErrorKind::SystemFailure,
            RuntimeError::Json(_) => ErrorKind::SystemFailure,
        }
    }

    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError::Federation {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
