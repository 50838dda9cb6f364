use crate::Error;

use std::time::Duration;

use courier_core::{Status, Store};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

/// Sweeps envelopes whose delivery attempt has concluded.
///
/// `pending` and `in_flight` envelopes are live work and are never removed.
/// The store must be open.
#[derive(Clone, Debug)]
pub struct GarbageCollector<S>
where
    S: Store,
{
    store: S,
}

impl<S> GarbageCollector<S>
where
    S: Store,
{
    /// Creates a collector over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Removes every envelope with a terminal status and returns how many
    /// were removed.
    ///
    /// # Errors
    /// Returns the store's error.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Result<usize, Error> {
        let mut removed = 0;

        for status in Status::TERMINAL {
            for envelope in self.store.find(status).await.map_err(Error::store)? {
                self.store
                    .remove(envelope.id())
                    .await
                    .map_err(Error::store)?;
                removed += 1;
            }
        }

        debug!(removed, "collected terminal envelopes");
        Ok(removed)
    }

    /// Calls [`GarbageCollector::collect`] every `period` until `shutdown` is
    /// cancelled. Collection errors are logged.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) {
        let mut collect_interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        collect_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = collect_interval.tick() => {
                    if let Err(e) = self.collect().await {
                        error!(error = %e, "garbage collection failed");
                    }
                }
            }
        }

        debug!("garbage collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use courier_core::{Envelope, Message};
    use courier_store_memory::MemoryStore;

    fn envelope(status: Status) -> Envelope {
        let mut record = serde_json::Map::new();
        record.insert("table".to_string(), 7.into());

        Envelope::new(Some("order".to_string()), vec![Message::Record(record)]).with_status(status)
    }

    #[tokio::test]
    async fn test_collect_keeps_live_envelopes() {
        let store = MemoryStore::new();
        store.open().await.unwrap();

        let not_delivered = envelope(Status::NotDelivered);
        let partially_delivered = envelope(Status::PartiallyDelivered);
        let not_routed = envelope(Status::NotRouted);
        let in_flight = envelope(Status::InFlight);
        let delivered = envelope(Status::Delivered);
        let pending = envelope(Status::Pending);

        for envelope in [
            &not_delivered,
            &partially_delivered,
            &not_routed,
            &in_flight,
            &delivered,
            &pending,
        ] {
            store.write(envelope).await.unwrap();
        }

        let collector = GarbageCollector::new(store.clone());
        assert_eq!(collector.collect().await.unwrap(), 4);

        for status in Status::TERMINAL {
            assert!(store.find(status).await.unwrap().is_empty());
        }
        assert_eq!(store.find(Status::InFlight).await.unwrap(), vec![in_flight]);
        assert_eq!(store.find(Status::Pending).await.unwrap(), vec![pending]);

        assert_eq!(collector.collect().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let store = MemoryStore::new();
        store.open().await.unwrap();
        store.write(&envelope(Status::Delivered)).await.unwrap();

        let collector = GarbageCollector::new(store.clone());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { collector.run(Duration::from_millis(20), shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(store.find(Status::Delivered).await.unwrap().is_empty());
    }
}
