use courier_core::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The store is closed.
    #[error("the store is closed")]
    Closed,

    /// No envelope has the given id.
    #[error("envelope {0} not found")]
    NotFound(String),
}

impl StoreError for Error {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
