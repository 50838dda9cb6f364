use courier_core::StoreError;
use thiserror::Error;

/// Errors that can occur when using the NATS envelope store.
#[derive(Debug, Error)]
pub enum Error {
    /// The store is closed.
    #[error("the store is closed")]
    Closed,

    /// Error creating the KV bucket.
    #[error("NATS JetStream context error creating KV store: {0}")]
    CreateKv(String),

    /// A stored record could not be decoded.
    #[error("failed to decode record: {0}")]
    Decode(String),

    /// A record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(String),

    /// Error reading a record.
    #[error("NATS KV store entry operation error (get): {0}")]
    Entry(#[from] async_nats::jetstream::kv::EntryError),

    /// Error listing keys.
    #[error("NATS KV store keys operation error: {0}")]
    Keys(String),

    /// No record with the given id.
    #[error("no envelope with id {0}")]
    NotFound(String),

    /// Error writing a record.
    #[error("NATS KV store put operation error: {0}")]
    Put(#[from] async_nats::jetstream::kv::PutError),

    /// Error removing a record.
    #[error("NATS KV store purge operation error: {0}")]
    Purge(String),
}

impl From<courier_core::Error> for Error {
    fn from(error: courier_core::Error) -> Self {
        match error {
            courier_core::Error::Encode(message) => Self::Encode(message),
            other => Self::Decode(other.to_string()),
        }
    }
}

impl StoreError for Error {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
