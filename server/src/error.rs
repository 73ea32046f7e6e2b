use std::io;

use chat::FramingError;

use crate::registry::ConnectionId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fatal at startup.
    #[error("failed to bind listener on {addr}: {source}")]
    ListenerBind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Transient, the accept loop keeps going.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("connection {0} is already registered")]
    DuplicateRegistration(ConnectionId),

    /// Local to one destination and never fatal.
    #[error("write to connection {id} failed: {reason}")]
    WriteFailure { id: ConnectionId, reason: &'static str },

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A connection was asked to make a move its lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {event} a connection that is {from}")]
pub struct StateError {
    pub from: &'static str,
    pub event: &'static str,
}
