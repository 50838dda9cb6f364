//! Implementation of the packet transport using a NATS `JetStream` work-queue
//! stream.
//!
//! Every instance pulls from one durable consumer and acks each packet as soon
//! as it is received, so a routed packet reaches exactly one instance.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use async_nats::Client;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_trait::async_trait;
use bytes::Bytes;
use courier_core::{Incoming, Transport};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Upper bound of the random wait before each receive, so a rejected packet
/// does not always bounce back to the same instance.
const MAX_RECEIVE_JITTER_MICROS: u64 = 10_000;

/// First wait after a failed receive; doubles on each consecutive failure.
const RECEIVE_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Cap on the wait between consecutive failed receives.
const RECEIVE_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Options for configuring a `NatsTransport`.
#[derive(Clone, Debug)]
pub struct NatsTransportOptions {
    /// The NATS client to use.
    pub client: Client,

    /// Durable consumer shared by every instance. Defaults to the stream name.
    pub consumer_name: Option<String>,

    /// Number of replicas for the stream. Defaults to 1 if not set.
    pub num_replicas: Option<usize>,

    /// Whether to persist routed packets to disk.
    pub persist: bool,

    /// The work-queue stream name.
    pub stream_name: String,

    /// Subject packets are published on. Defaults to the stream name.
    pub subject: Option<String>,
}

struct Connection {
    consumer: Consumer<PullConfig>,
    shutdown: CancellationToken,
}

/// Packet transport backed by a NATS `JetStream` work-queue stream.
///
/// Clones share one lifecycle. Build separate transports from the same options
/// to get competing instances.
#[derive(Clone)]
pub struct NatsTransport {
    consumer_name: String,
    jetstream_context: JetStreamContext,
    num_replicas: usize,
    persist: bool,
    state: Arc<RwLock<Option<Connection>>>,
    stream_name: String,
    subject: String,
}

impl Debug for NatsTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsTransport")
            .field("consumer_name", &self.consumer_name)
            .field("stream_name", &self.stream_name)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl NatsTransport {
    /// Creates a new, closed `NatsTransport`. The stream and consumer are
    /// created on `open` if they don't exist yet.
    #[must_use]
    pub fn new(
        NatsTransportOptions {
            client,
            consumer_name,
            num_replicas,
            persist,
            stream_name,
            subject,
        }: NatsTransportOptions,
    ) -> Self {
        Self {
            consumer_name: consumer_name.unwrap_or_else(|| stream_name.clone()),
            jetstream_context: async_nats::jetstream::new(client),
            num_replicas: num_replicas.unwrap_or(1),
            persist,
            state: Arc::new(RwLock::new(None)),
            subject: subject.unwrap_or_else(|| stream_name.clone()),
            stream_name,
        }
    }

    async fn connect(&self) -> Result<Connection, Error> {
        let stream = self
            .jetstream_context
            .get_or_create_stream(StreamConfig {
                name: self.stream_name.clone(),
                subjects: vec![self.subject.clone()],
                retention: RetentionPolicy::WorkQueue,
                num_replicas: self.num_replicas,
                storage: if self.persist {
                    StorageType::File
                } else {
                    StorageType::Memory
                },
                ..Default::default()
            })
            .await
            .map_err(|e| Error::CreateStream(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.consumer_name,
                PullConfig {
                    durable_name: Some(self.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::CreateConsumer(e.to_string()))?;

        Ok(Connection {
            consumer,
            shutdown: CancellationToken::new(),
        })
    }

    async fn ensure_open(&self) -> Result<(), Error> {
        if self.state.read().await.is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }
}

fn receive_jitter() -> Duration {
    Duration::from_micros(fastrand::u64(0..MAX_RECEIVE_JITTER_MICROS))
}

// Exponential backoff with 0-10% jitter.
fn next_retry_delay(delay: Duration) -> Duration {
    std::cmp::min(
        delay.mul_f64(fastrand::f64().mul_add(0.1, 2.0)),
        RECEIVE_RETRY_MAX_DELAY,
    )
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;

    #[instrument(skip(self), fields(stream = %self.stream_name))]
    async fn open(&self) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;

        if state.is_none() {
            *state = Some(self.connect().await?);
            debug!(consumer = %self.consumer_name, "nats transport opened");
        }

        Ok(())
    }

    #[instrument(skip(self), fields(stream = %self.stream_name))]
    async fn close(&self) -> Result<(), Self::Error> {
        if let Some(connection) = self.state.write().await.take() {
            connection.shutdown.cancel();
            debug!("nats transport closed");
        }

        Ok(())
    }

    async fn route(&self, packed_packet: String) -> Result<(), Self::Error> {
        self.ensure_open().await?;

        self.jetstream_context
            .publish(self.subject.clone(), Bytes::from(packed_packet))
            .await?
            .await?;

        Ok(())
    }

    async fn remove(&self, packed_packet: String) -> Result<(), Self::Error> {
        self.ensure_open().await?;

        // Acked on receipt, which already removed it from the work queue.
        debug!(packet = %packed_packet, "nats transport remove is a no-op");
        Ok(())
    }

    async fn incoming(&self) -> Result<Incoming, Self::Error> {
        let (consumer, shutdown) = {
            let state = self.state.read().await;
            let connection = state.as_ref().ok_or(Error::Closed)?;

            (connection.consumer.clone(), connection.shutdown.clone())
        };

        // One message per pull, so packets left on the server stay available
        // to the other instances.
        let messages = consumer
            .stream()
            .max_messages_per_batch(1)
            .messages()
            .await
            .map_err(|e| Error::Messages(e.to_string()))?;

        let stream = futures::stream::unfold(
            (messages, shutdown, RECEIVE_RETRY_BASE_DELAY),
            |(mut messages, shutdown, mut retry_delay)| async move {
                loop {
                    let received = tokio::select! {
                        () = shutdown.cancelled() => return None,
                        received = async {
                            tokio::time::sleep(receive_jitter()).await;
                            messages.next().await
                        } => received?,
                    };

                    let message = match received {
                        Ok(message) => {
                            retry_delay = RECEIVE_RETRY_BASE_DELAY;
                            message
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                delay = ?retry_delay,
                                "failed to receive from nats consumer, retrying"
                            );
                            tokio::select! {
                                () = shutdown.cancelled() => return None,
                                () = tokio::time::sleep(retry_delay) => {}
                            }
                            retry_delay = next_retry_delay(retry_delay);
                            continue;
                        }
                    };

                    if let Err(e) = message.ack().await {
                        warn!(error = %e, "failed to ack received packet");
                    }

                    match String::from_utf8(message.payload.to_vec()) {
                        Ok(packet) => return Some((packet, (messages, shutdown, retry_delay))),
                        Err(e) => warn!(error = %e, "dropping packet that is not text"),
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
