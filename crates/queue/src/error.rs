use std::error::Error as StdError;

use courier_core::{StoreError, TransportError};
use thiserror::Error;

/// Opaque error type returned by consumers and carried for backend failures.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur in the message queue.
#[derive(Debug, Error)]
pub enum Error {
    /// `open` was called on an already open component.
    #[error("already open")]
    AlreadyOpen,

    /// The named component is closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Envelope construction, transition or encoding error.
    #[error(transparent)]
    Envelope(#[from] courier_core::Error),

    /// The store has no envelope with the given id.
    #[error("envelope not found: {0}")]
    NotFound(String),

    /// The operation requires an open message queue.
    #[error("message queue is not open")]
    NotOpen,

    /// The transport refused a packet.
    #[error("failed to route packet: {0}")]
    Routing(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(BoxError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(BoxError),
}

impl Error {
    pub(crate) fn store<E: StoreError>(error: E) -> Self {
        if error.is_not_found() {
            Self::NotFound(error.to_string())
        } else if error.is_closed() {
            Self::Closed("store")
        } else {
            Self::Store(Box::new(error))
        }
    }

    pub(crate) fn transport<E: TransportError>(error: E) -> Self {
        if error.is_closed() {
            Self::Closed("transport")
        } else {
            Self::Transport(Box::new(error))
        }
    }
}
