//! In-memory transport implementation for testing
//!
//! Transports attached to the same [`MemoryBus`] compete for every routed
//! packet: each packet is received by exactly one open transport, which is
//! the destructive receive the queue expects from a transport.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{Incoming, Transport};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound of the random wait before each receive, so a rejected packet
/// does not always bounce back to the same transport.
const MAX_RECEIVE_JITTER_MICROS: u64 = 10_000;

/// Shared in-process channel that memory transports attach to.
#[derive(Clone, Debug)]
pub struct MemoryBus {
    receiver: flume::Receiver<String>,
    sender: flume::Sender<String>,
}

impl MemoryBus {
    /// Creates a new, empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();

        Self { receiver, sender }
    }

    /// Number of routed packets not yet received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Whether every routed packet has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process transport attached to a [`MemoryBus`].
///
/// Receiving is destructive: every transport on the bus competes for each
/// routed packet and exactly one open transport receives it, so `remove` has
/// nothing left to delete.
///
/// Clones share the same lifecycle; use [`MemoryTransport::attach`] to get an
/// independent transport on the same bus.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    bus: MemoryBus,
    shutdown: Arc<RwLock<Option<CancellationToken>>>,
}

impl MemoryTransport {
    /// Creates a transport on a fresh bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bus(MemoryBus::new())
    }

    /// Creates a transport on the given bus.
    #[must_use]
    pub fn with_bus(bus: MemoryBus) -> Self {
        Self {
            bus,
            shutdown: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates another, independently opened transport on the same bus.
    #[must_use]
    pub fn attach(&self) -> Self {
        Self::with_bus(self.bus.clone())
    }

    /// The bus this transport is attached to.
    #[must_use]
    pub const fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    async fn shutdown_token(&self) -> Result<CancellationToken, Error> {
        self.shutdown.read().await.clone().ok_or(Error::Closed)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn receive_jitter() -> Duration {
    Duration::from_micros(fastrand::u64(0..MAX_RECEIVE_JITTER_MICROS))
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;

    async fn open(&self) -> Result<(), Self::Error> {
        self.shutdown
            .write()
            .await
            .get_or_insert_with(CancellationToken::new);

        debug!("memory transport opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if let Some(token) = self.shutdown.write().await.take() {
            token.cancel();
            debug!("memory transport closed");
        }

        Ok(())
    }

    async fn route(&self, packed_packet: String) -> Result<(), Self::Error> {
        self.shutdown_token().await?;

        self.bus
            .sender
            .send_async(packed_packet)
            .await
            .map_err(|_| Error::Disconnected)
    }

    async fn remove(&self, packed_packet: String) -> Result<(), Self::Error> {
        self.shutdown_token().await?;

        // Receiving already took the packet off the bus.
        debug!(packet = %packed_packet, "memory transport remove is a no-op");
        Ok(())
    }

    async fn incoming(&self) -> Result<Incoming, Self::Error> {
        let token = self.shutdown_token().await?;
        let receiver = self.bus.receiver.clone();

        let stream = futures::stream::unfold((receiver, token), |(receiver, token)| async move {
            let packet = tokio::select! {
                () = token.cancelled() => return None,
                received = async {
                    tokio::time::sleep(receive_jitter()).await;
                    receiver.recv_async().await
                } => received.ok()?,
            };

            Some((packet, (receiver, token)))
        });

        Ok(stream.boxed())
    }
}
