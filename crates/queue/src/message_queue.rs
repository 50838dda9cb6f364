use crate::router::PacketBags;
use crate::{
    Consumer, ConsumerConfig, ConsumerConfigPool, Error, MessageQueueOptions, Packet, PacketBag,
    Router, Unsubscribe,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use courier_core::{Envelope, Message, Status, Store, Transport};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Private channel on which retries for one consumer of one queue are
/// published. The closing parenthesis keeps one token from being a prefix of
/// another.
#[must_use]
pub fn consumer_channel(queue_routing_id: &str, consumer_routing_id: &str) -> String {
    format!("__consumer({queue_routing_id}@{consumer_routing_id})")
}

#[derive(Debug)]
struct Inner<S, T>
where
    S: Store,
    T: Transport,
{
    consumer_configs: ConsumerConfigPool,
    options: MessageQueueOptions,
    router: Router<T>,
    routing_id: String,
    shutdown: Mutex<Option<CancellationToken>>,
    store: S,
}

/// Publish/subscribe message queue over a [`Store`] and a [`Transport`].
///
/// Publishing persists an [`Envelope`] and routes a `{id}` packet; whichever
/// queue instance receives the packet loads the envelope and runs its
/// matching consumers. Failing consumers are retried on a private channel,
/// in batches flushed every `retry_interval`.
///
/// Several instances may share one store and transport as competing
/// consumers; each needs its own routing id. Call `close` before dropping an
/// open queue so its workers stop.
#[derive(Clone, Debug)]
pub struct MessageQueue<S, T>
where
    S: Store,
    T: Transport,
{
    inner: Arc<Inner<S, T>>,
}

impl<S, T> MessageQueue<S, T>
where
    S: Store,
    T: Transport,
{
    /// Creates a closed queue.
    pub fn new(
        routing_id: impl Into<String>,
        store: S,
        transport: T,
        mut options: MessageQueueOptions,
    ) -> Self {
        options.retry_interval = options.retry_interval.max(Duration::from_millis(1));

        Self {
            inner: Arc::new(Inner {
                consumer_configs: ConsumerConfigPool::new(),
                options,
                router: Router::new(transport),
                routing_id: routing_id.into(),
                shutdown: Mutex::new(None),
                store,
            }),
        }
    }

    /// The queue's routing id.
    #[must_use]
    pub fn routing_id(&self) -> &str {
        &self.inner.routing_id
    }

    /// The resolved options.
    #[must_use]
    pub fn options(&self) -> &MessageQueueOptions {
        &self.inner.options
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Whether the queue is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.shutdown.lock().is_some()
    }

    /// Persists a new envelope and routes it.
    ///
    /// A `None` channel broadcasts to every subscribed consumer. The returned
    /// envelope is the snapshot after routing: `in_flight`, or `not_routed`
    /// with the routing error attached.
    ///
    /// # Errors
    /// Returns [`Error::NotOpen`] on a closed queue, or the store's error.
    #[instrument(skip(self, messages), fields(routing_id = %self.inner.routing_id))]
    pub async fn publish(
        &self,
        channel: Option<&str>,
        messages: Vec<Message>,
    ) -> Result<Envelope, Error> {
        self.ensure_open()?;

        let envelope = Envelope::new(channel.map(ToString::to_string), messages);
        self.inner
            .store
            .write(&envelope)
            .await
            .map_err(Error::store)?;

        self.inner.route(envelope).await
    }

    /// Registers `consumer` on the given channel prefixes.
    ///
    /// `routing_id` defaults to [`Consumer::routing_id`]. The consumer also
    /// listens on its private retry channel.
    pub fn subscribe<I, C>(&self, channels: I, consumer: C, routing_id: Option<&str>) -> Unsubscribe
    where
        I: IntoIterator,
        I::Item: Into<String>,
        C: Consumer,
    {
        let routing_id = routing_id.map_or_else(|| consumer.routing_id(), ToString::to_string);

        let mut channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        channels.push(consumer_channel(&self.inner.routing_id, &routing_id));

        debug!(
            queue = %self.inner.routing_id,
            consumer = %routing_id,
            channels = ?channels,
            "consumer subscribed"
        );

        self.inner
            .consumer_configs
            .push(ConsumerConfig::new(channels, Arc::new(consumer), routing_id))
    }

    /// Opens the store, then starts the retry and delivery workers, which
    /// opens the transport. Runs [`MessageQueue::warm_up`] if configured; a
    /// failed warm up closes the queue again.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyOpen`] if the queue is open, or the backend
    /// error that prevented opening.
    #[instrument(skip(self), fields(routing_id = %self.inner.routing_id))]
    pub async fn open(&self) -> Result<(), Error> {
        let shutdown = CancellationToken::new();
        {
            let mut current = self.inner.shutdown.lock();
            if current.is_some() {
                return Err(Error::AlreadyOpen);
            }
            *current = Some(shutdown.clone());
        }

        if let Err(e) = self.start(shutdown).await {
            *self.inner.shutdown.lock() = None;
            return Err(e);
        }

        info!("message queue opened");

        if self.inner.options.warm_up_on_open {
            if let Err(e) = self.warm_up().await {
                warn!(error = %e, "warm up failed, closing message queue");
                if let Err(close_error) = self.close().await {
                    warn!(error = %close_error, "failed to close after warm up failure");
                }
                return Err(e);
            }
        }

        Ok(())
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), Error> {
        self.inner.store.open().await.map_err(Error::store)?;

        let packet_bags = match self.inner.router.open().await {
            Ok(packet_bags) => packet_bags,
            Err(e) => {
                if let Err(close_error) = self.inner.store.close().await {
                    warn!(error = %close_error, "failed to close store after open failure");
                }
                return Err(e);
            }
        };

        let (retries, retry_receiver) = mpsc::unbounded_channel();
        tokio::spawn(retry_worker(
            Arc::clone(&self.inner),
            retry_receiver,
            shutdown.clone(),
        ));
        tokio::spawn(delivery_worker(
            Arc::clone(&self.inner),
            packet_bags,
            retries,
            shutdown,
        ));

        Ok(())
    }

    /// Stops the workers, closes the router (and with it the transport) and
    /// closes the store.
    ///
    /// A delivery already running finishes; retries still buffered stay
    /// `pending` in the store, where `warm_up` picks them up later.
    ///
    /// # Errors
    /// Returns [`Error::NotOpen`] if the queue is not open, or the backend
    /// error raised while closing.
    #[instrument(skip(self), fields(routing_id = %self.inner.routing_id))]
    pub async fn close(&self) -> Result<(), Error> {
        let shutdown = self.inner.shutdown.lock().take().ok_or(Error::NotOpen)?;
        shutdown.cancel();

        self.inner.router.close().await?;
        self.inner.store.close().await.map_err(Error::store)?;

        info!("message queue closed");
        Ok(())
    }

    /// Routes again every `pending` envelope last updated longer than
    /// `pending_message_max_age` ago. Returns how many were routed.
    ///
    /// # Errors
    /// Returns [`Error::NotOpen`] on a closed queue, or the store's error.
    #[instrument(skip(self), fields(routing_id = %self.inner.routing_id))]
    pub async fn warm_up(&self) -> Result<usize, Error> {
        self.ensure_open()?;

        let max_age = TimeDelta::from_std(self.inner.options.pending_message_max_age)
            .unwrap_or(TimeDelta::MAX);
        let Some(threshold) = Utc::now().checked_sub_signed(max_age) else {
            return Ok(0);
        };

        let stale: Vec<Envelope> = self
            .inner
            .store
            .find(Status::Pending)
            .await
            .map_err(Error::store)?
            .into_iter()
            .filter(|envelope| {
                envelope.status() == Status::Pending && envelope.updated_at() < threshold
            })
            .collect();

        let routed = stale.len();
        for envelope in stale {
            self.inner.route(envelope).await?;
        }

        info!(routed, "re-routed stale pending envelopes");
        Ok(routed)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }
}

impl<S, T> Inner<S, T>
where
    S: Store,
    T: Transport,
{
    /// Marks the envelope `in_flight` before handing its packet to the
    /// router, so a fast delivery is never overwritten by a late write.
    async fn route(&self, mut envelope: Envelope) -> Result<Envelope, Error> {
        envelope.update(Status::InFlight, None)?;
        self.store.write(&envelope).await.map_err(Error::store)?;

        if let Err(e) = self.router.route(&Packet::new(envelope.id())).await {
            warn!(id = %envelope.id(), error = %e, "envelope not routed");

            envelope.update(Status::NotRouted, Some(e.to_string()))?;
            self.store.write(&envelope).await.map_err(Error::store)?;
        }

        Ok(envelope)
    }

    async fn deliver(
        &self,
        packet_bag: PacketBag<T>,
        retries: &mpsc::UnboundedSender<Envelope>,
    ) -> Result<(), Error> {
        let mut envelope = self
            .store
            .read(&packet_bag.packet().id)
            .await
            .map_err(Error::store)?;
        let consumer_configs = self.consumer_configs.filter_by_channel(envelope.channel());

        if consumer_configs.is_empty() {
            debug!(id = %envelope.id(), channel = ?envelope.channel(), "no consumer matched, rejecting");
            return packet_bag.reject().await;
        }

        let mut failures = 0;
        let mut last_error = None;

        for consumer_config in &consumer_configs {
            let Err(consumer_error) = consumer_config.consume(envelope.messages()).await else {
                continue;
            };

            failures += 1;
            warn!(
                id = %envelope.id(),
                consumer = %consumer_config.routing_id(),
                retry_attempts = envelope.retry_attempts(),
                error = %consumer_error,
                "consumer failed"
            );

            if envelope.retry_attempts() < self.options.max_retry_attempts {
                if let Err(e) = self
                    .schedule_retry(&envelope, consumer_config, &consumer_error, retries)
                    .await
                {
                    error!(id = %envelope.id(), error = %e, "failed to schedule retry");
                }
            } else {
                debug!(
                    id = %envelope.id(),
                    consumer = %consumer_config.routing_id(),
                    "retry attempts exhausted"
                );
            }

            last_error = Some(consumer_error);
        }

        let status = match failures {
            0 => Status::Delivered,
            _ if consumer_configs.len() > 1 => Status::PartiallyDelivered,
            _ => Status::NotDelivered,
        };

        envelope.update(status, last_error)?;
        self.store.write(&envelope).await.map_err(Error::store)?;
        debug!(id = %envelope.id(), status = %status, "envelope delivered");

        packet_bag.acknowledge().await
    }

    async fn schedule_retry(
        &self,
        envelope: &Envelope,
        consumer_config: &ConsumerConfig,
        consumer_error: &str,
        retries: &mpsc::UnboundedSender<Envelope>,
    ) -> Result<(), Error> {
        let retry = envelope
            .clone_to(
                Some(consumer_channel(&self.routing_id, consumer_config.routing_id())),
                envelope.retry_attempts() + 1,
            )
            .with_error(Some(consumer_error.to_string()));

        self.store.write(&retry).await.map_err(Error::store)?;
        debug!(id = %retry.id(), origin = %envelope.id(), "retry scheduled");

        retries
            .send(retry)
            .map_err(|_| Error::Closed("retry scheduler"))
    }
}

/// Handles inbound packets one at a time, in arrival order.
async fn delivery_worker<S, T>(
    inner: Arc<Inner<S, T>>,
    mut packet_bags: PacketBags<T>,
    retries: mpsc::UnboundedSender<Envelope>,
    shutdown: CancellationToken,
) where
    S: Store,
    T: Transport,
{
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            packet_bag = packet_bags.next() => {
                let Some(packet_bag) = packet_bag else {
                    break;
                };

                if let Err(e) = inner.deliver(packet_bag, &retries).await {
                    warn!(error = %e, "delivery failed");
                }
            }
        }
    }

    debug!(routing_id = %inner.routing_id, "delivery worker stopped");
}

/// Buffers retries and routes the whole buffer at every `retry_interval`.
async fn retry_worker<S, T>(
    inner: Arc<Inner<S, T>>,
    mut retries: mpsc::UnboundedReceiver<Envelope>,
    shutdown: CancellationToken,
) where
    S: Store,
    T: Transport,
{
    let mut buffer: Vec<Envelope> = Vec::new();
    let mut flush_interval = tokio::time::interval(inner.options.retry_interval);
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    flush_interval.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            Some(envelope) = retries.recv() => buffer.push(envelope),
            _ = flush_interval.tick() => {
                if buffer.is_empty() {
                    continue;
                }

                debug!(count = buffer.len(), "flushing retries");
                for envelope in std::mem::take(&mut buffer) {
                    if let Err(e) = inner.route(envelope).await {
                        warn!(error = %e, "failed to route retry");
                    }
                }
            }
        }
    }

    if !buffer.is_empty() {
        info!(
            pending = buffer.len(),
            "retry worker stopped, buffered retries stay pending"
        );
    }
    debug!(routing_id = %inner.routing_id, "retry worker stopped");
}
