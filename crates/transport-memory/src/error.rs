use courier_core::TransportError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The transport is closed.
    #[error("the transport is closed")]
    Closed,

    /// The bus no longer accepts packets.
    #[error("the memory bus is disconnected")]
    Disconnected,
}

impl TransportError for Error {
    fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
