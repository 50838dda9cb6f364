use crate::Status;

use thiserror::Error;

/// Errors raised while building, transitioning or encoding envelopes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A value could not be decoded.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// A value could not be encoded.
    #[error("failed to encode: {0}")]
    Encode(String),

    /// The requested status would move the envelope backwards.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: Status,
        /// Requested status.
        to: Status,
    },

    /// The envelope or one of its messages is malformed.
    #[error("validation error: {0}")]
    Validation(String),
}
