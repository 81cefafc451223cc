//! The shared taxonomy of failure kinds, carried inside each crate's own error enum so that
//! callers can match on *kind* rather than parse error strings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One of the ten failure categories a federation participant can report.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A call argument was malformed or out of range.
    InvalidArgument,
    /// The call is not valid in the participant's current lifecycle state.
    InvalidFunctionCall,
    /// A name or id referenced an object that does not exist.
    InvalidIdentifier,
    /// A requested state transition is not reachable from the current state.
    InvalidStateTransition,
    /// The transport could not establish or maintain a connection.
    ConnectionFailure,
    /// Registration failed (duplicate name, type mismatch, unresolved required target).
    RegistrationFailure,
    /// An unrecoverable internal failure.
    SystemFailure,
    /// A federate's user-level execution logic failed.
    ExecutionFailure,
    /// An input was received but could not be used and was dropped.
    DiscardedInput,
    /// A bounded buffer or queue has no room for more data.
    InsufficientSpace,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::InvalidFunctionCall => "invalid function call",
            ErrorKind::InvalidIdentifier => "invalid identifier",
            ErrorKind::InvalidStateTransition => "invalid state transition",
            ErrorKind::ConnectionFailure => "connection failure",
            ErrorKind::RegistrationFailure => "registration failure",
            ErrorKind::SystemFailure => "system failure",
            ErrorKind::ExecutionFailure => "execution failure",
            ErrorKind::DiscardedInput => "discarded input",
            ErrorKind::InsufficientSpace => "insufficient space",
        };
        write!(f, "{s}")
    }
}
