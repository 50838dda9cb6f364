//! Implementation of envelope storage using a NATS `JetStream` key-value bucket,
//! shared by every queue instance connected to the same cluster.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_nats::Client;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::kv::{Config as KvConfig, Store as KvStore};
use async_nats::jetstream::stream::StorageType;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_core::{Envelope, Message, Status, Store};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Options for configuring a `NatsStore`.
#[derive(Clone, Debug)]
pub struct NatsStoreOptions {
    /// The bucket holding the envelope records.
    pub bucket: String,

    /// The NATS client to use.
    pub client: Client,

    /// Number of replicas for the KV bucket. Defaults to 1 if not set.
    pub num_replicas: Option<usize>,

    /// Whether to persist the records to disk.
    pub persist: bool,
}

/// Stored form of an envelope. Messages are kept packed.
#[derive(Debug, Deserialize, Serialize)]
struct Record {
    channel: Option<String>,
    error: Option<String>,
    id: String,
    messages: Vec<Message>,
    retry_attempts: u32,
    status: Status,
    updated_at: DateTime<Utc>,
}

impl Record {
    fn encode(envelope: &Envelope) -> Result<Bytes, Error> {
        let packed = envelope.pack()?;
        let record = Self {
            channel: packed.channel().map(ToString::to_string),
            error: packed.error().map(ToString::to_string),
            id: packed.id().to_string(),
            messages: packed.messages().to_vec(),
            retry_attempts: packed.retry_attempts(),
            status: packed.status(),
            updated_at: packed.updated_at(),
        };

        let mut bytes = Vec::new();
        ciborium::into_writer(&record, &mut bytes).map_err(|e| Error::Encode(e.to_string()))?;

        Ok(Bytes::from(bytes))
    }

    fn decode(bytes: &[u8]) -> Result<Envelope, Error> {
        let record: Self =
            ciborium::from_reader(bytes).map_err(|e| Error::Decode(e.to_string()))?;

        Ok(Envelope::new(record.channel, record.messages)
            .with_id(record.id)
            .with_status(record.status)
            .with_error(record.error)
            .with_retry_attempts(record.retry_attempts)
            .with_updated_at(record.updated_at)
            .unpack()?)
    }
}

#[derive(Default)]
struct State {
    holders: usize,
    kv_store: Option<KvStore>,
}

/// Envelope store backed by a NATS `JetStream` KV bucket.
///
/// Clones share one lifecycle; the bucket handle is released when the last
/// holder closes the store. Records survive closing.
#[derive(Clone)]
pub struct NatsStore {
    bucket: String,
    jetstream_context: JetStreamContext,
    num_replicas: usize,
    persist: bool,
    state: Arc<RwLock<State>>,
}

impl Debug for NatsStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsStore")
            .field("bucket", &self.bucket)
            .field("num_replicas", &self.num_replicas)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

impl NatsStore {
    /// Creates a new, closed `NatsStore`. The bucket is created or updated on
    /// `open`.
    #[must_use]
    pub fn new(
        NatsStoreOptions {
            bucket,
            client,
            num_replicas,
            persist,
        }: NatsStoreOptions,
    ) -> Self {
        Self {
            bucket,
            jetstream_context: async_nats::jetstream::new(client),
            num_replicas: num_replicas.unwrap_or(1),
            persist,
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    async fn kv_store(&self) -> Result<KvStore, Error> {
        self.state
            .read()
            .await
            .kv_store
            .clone()
            .ok_or(Error::Closed)
    }

    async fn keys(kv_store: &KvStore) -> Result<Vec<String>, Error> {
        kv_store
            .keys()
            .await
            .map_err(|e| Error::Keys(e.to_string()))?
            .try_collect::<Vec<String>>()
            .await
            .map_err(|e| Error::Keys(e.to_string()))
    }
}

#[async_trait]
impl Store for NatsStore {
    type Error = Error;

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn open(&self) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;

        if state.kv_store.is_none() {
            let config = KvConfig {
                bucket: self.bucket.clone(),
                num_replicas: self.num_replicas,
                storage: if self.persist {
                    StorageType::File
                } else {
                    StorageType::Memory
                },
                ..Default::default()
            };

            state.kv_store = Some(
                self.jetstream_context
                    .create_or_update_key_value(config)
                    .await
                    .map_err(|e| Error::CreateKv(e.to_string()))?,
            );
        }
        state.holders += 1;

        debug!(holders = state.holders, "nats store opened");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn close(&self) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            state.kv_store = None;
        }

        debug!(holders = state.holders, "nats store closed");
        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        let kv_store = self.kv_store().await?;

        for key in Self::keys(&kv_store).await? {
            kv_store
                .purge(&key)
                .await
                .map_err(|e| Error::Purge(e.to_string()))?;
        }

        Ok(())
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), Self::Error> {
        let bytes = Record::encode(envelope)?;

        self.kv_store().await?.put(envelope.id(), bytes).await?;

        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Envelope, Self::Error> {
        let bytes = self
            .kv_store()
            .await?
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        Record::decode(&bytes)
    }

    async fn find(&self, status: Status) -> Result<Vec<Envelope>, Self::Error> {
        let kv_store = self.kv_store().await?;
        let mut found = Vec::new();

        for key in Self::keys(&kv_store).await? {
            // Removed concurrently by another holder.
            let Some(bytes) = kv_store.get(&key).await? else {
                continue;
            };

            match Record::decode(&bytes) {
                Ok(envelope) if envelope.status() == status => found.push(envelope),
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable record"),
            }
        }

        Ok(found)
    }

    async fn remove(&self, id: &str) -> Result<(), Self::Error> {
        self.kv_store()
            .await?
            .purge(id)
            .await
            .map_err(|e| Error::Purge(e.to_string()))
    }
}
