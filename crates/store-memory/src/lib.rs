//! In-memory (single process) implementation of envelope storage for tests and
//! local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Envelope, Status, Store};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    holders: usize,
    records: Option<HashMap<String, Envelope>>,
}

/// In-memory envelope store.
///
/// Clones share the same records, so several queues in one process can use
/// one store. Opening is counted: the records are dropped when the last
/// holder closes the store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    /// Creates a new, closed `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Error = Error;

    async fn open(&self) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        state.holders += 1;
        state.records.get_or_insert_with(HashMap::new);

        debug!(holders = state.holders, "memory store opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            state.records = None;
        }

        debug!(holders = state.holders, "memory store closed");
        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.state
            .write()
            .await
            .records
            .as_mut()
            .ok_or(Error::Closed)?
            .clear();

        Ok(())
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), Self::Error> {
        self.state
            .write()
            .await
            .records
            .as_mut()
            .ok_or(Error::Closed)?
            .insert(envelope.id().to_string(), envelope.clone());

        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Envelope, Self::Error> {
        self.state
            .read()
            .await
            .records
            .as_ref()
            .ok_or(Error::Closed)?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn find(&self, status: Status) -> Result<Vec<Envelope>, Self::Error> {
        Ok(self
            .state
            .read()
            .await
            .records
            .as_ref()
            .ok_or(Error::Closed)?
            .values()
            .filter(|envelope| envelope.status() == status)
            .cloned()
            .collect())
    }

    async fn remove(&self, id: &str) -> Result<(), Self::Error> {
        self.state
            .write()
            .await
            .records
            .as_mut()
            .ok_or(Error::Closed)?
            .remove(id);

        Ok(())
    }
}
