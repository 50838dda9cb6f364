use crate::{Envelope, Status};

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for store errors.
pub trait StoreError: Debug + Error + Send + Sync + 'static {
    /// Whether the error reports an unknown envelope id.
    fn is_not_found(&self) -> bool;

    /// Whether the error reports an operation on a closed store.
    fn is_closed(&self) -> bool;
}

/// A trait representing the durability backend holding envelope records.
///
/// The store holds the authoritative snapshot of every envelope; the queue
/// writes after each status change and reads back by id on delivery.
///
/// # Required Methods
/// - `open` / `close`: lifecycle. Every other operation fails on a closed store.
/// - `clear`: wipes all records.
/// - `write`: idempotent upsert keyed by id.
/// - `read`: fails with a not-found error if the id is unknown.
/// - `find`: every record currently at the given status.
/// - `remove`: deletes by id.
#[async_trait]
pub trait Store: Clone + Debug + Send + Sync + 'static {
    /// The error type for the store.
    type Error: StoreError;

    /// Opens the store.
    async fn open(&self) -> Result<(), Self::Error>;

    /// Closes the store.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Removes every record.
    async fn clear(&self) -> Result<(), Self::Error>;

    /// Inserts or replaces the record with the envelope's id.
    async fn write(&self, envelope: &Envelope) -> Result<(), Self::Error>;

    /// Reads the record with the given id.
    async fn read(&self, id: &str) -> Result<Envelope, Self::Error>;

    /// Lists every record at the given status.
    async fn find(&self, status: Status) -> Result<Vec<Envelope>, Self::Error>;

    /// Deletes the record with the given id.
    async fn remove(&self, id: &str) -> Result<(), Self::Error>;
}
