use crate::Consumer;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use courier_core::Message;
use futures::FutureExt;
use parking_lot::RwLock;

/// A subscription: the consumer, the channel prefixes it listens to and the
/// routing id naming it in retry channels.
pub struct ConsumerConfig {
    channels: Vec<String>,
    consumer: Arc<dyn Consumer>,
    routing_id: String,
}

impl ConsumerConfig {
    /// Creates a subscription.
    #[must_use]
    pub fn new(channels: Vec<String>, consumer: Arc<dyn Consumer>, routing_id: String) -> Self {
        Self {
            channels,
            consumer,
            routing_id,
        }
    }

    /// Subscribed channel prefixes, in subscription order.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// The consumer's routing id.
    #[must_use]
    pub fn routing_id(&self) -> &str {
        &self.routing_id
    }

    /// Whether `channel` starts with one of the non-empty subscribed prefixes.
    #[must_use]
    pub fn matches(&self, channel: &str) -> bool {
        self.channels
            .iter()
            .any(|prefix| !prefix.is_empty() && channel.starts_with(prefix.as_str()))
    }

    /// Runs the consumer, turning an error or a panic into a failure message.
    pub(crate) async fn consume(&self, messages: &[Message]) -> Result<(), String> {
        match AssertUnwindSafe(self.consumer.consume(messages))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("consumer {} panicked", self.routing_id)),
        }
    }
}

impl Debug for ConsumerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConsumerConfig")
            .field("channels", &self.channels)
            .field("routing_id", &self.routing_id)
            .finish_non_exhaustive()
    }
}

type Entries = RwLock<Vec<(u64, Arc<ConsumerConfig>)>>;

#[derive(Debug, Default)]
struct Registry {
    entries: Entries,
    next_key: AtomicU64,
}

/// Registry of subscriptions, matched against envelope channels.
#[derive(Clone, Debug, Default)]
pub struct ConsumerConfigPool {
    registry: Arc<Registry>,
}

impl ConsumerConfigPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription. The returned handle removes exactly this
    /// subscription.
    pub fn push(&self, config: ConsumerConfig) -> Unsubscribe {
        let key = self.registry.next_key.fetch_add(1, Ordering::Relaxed);

        self.registry
            .entries
            .write()
            .push((key, Arc::new(config)));

        Unsubscribe {
            key,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscriptions matching `channel`, in registration order.
    ///
    /// A `None` channel is a broadcast and matches every subscription.
    #[must_use]
    pub fn filter_by_channel(&self, channel: Option<&str>) -> Vec<Arc<ConsumerConfig>> {
        self.registry
            .entries
            .read()
            .iter()
            .filter(|(_, config)| channel.is_none_or(|channel| config.matches(channel)))
            .map(|(_, config)| Arc::clone(config))
            .collect()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.entries.read().len()
    }

    /// Whether no subscription is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.entries.read().is_empty()
    }
}

/// Handle returned by [`ConsumerConfigPool::push`].
///
/// Dropping the handle keeps the subscription registered.
#[derive(Debug)]
pub struct Unsubscribe {
    key: u64,
    registry: Weak<Registry>,
}

impl Unsubscribe {
    /// Removes the subscription. Deliveries already running are unaffected.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.write().retain(|(key, _)| *key != self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxError;

    fn config(channel: &str) -> ConsumerConfig {
        let consumer = |_: Vec<Message>| async { Ok::<(), BoxError>(()) };

        ConsumerConfig::new(
            vec![channel.to_string()],
            Arc::new(consumer),
            channel.to_string(),
        )
    }

    fn routing_ids(configs: &[Arc<ConsumerConfig>]) -> Vec<&str> {
        configs.iter().map(|config| config.routing_id()).collect()
    }

    #[test]
    fn test_filter_by_channel_prefix() {
        let pool = ConsumerConfigPool::new();
        pool.push(config("orders"));
        pool.push(config("bills"));
        pool.push(config("ord"));

        assert_eq!(
            routing_ids(&pool.filter_by_channel(Some("orders"))),
            ["orders", "ord"]
        );
        assert_eq!(
            routing_ids(&pool.filter_by_channel(Some("orders:1"))),
            ["orders", "ord"]
        );
        assert_eq!(routing_ids(&pool.filter_by_channel(Some("ord"))), ["ord"]);
        assert!(pool.filter_by_channel(Some("o")).is_empty());
        assert_eq!(routing_ids(&pool.filter_by_channel(Some("bills"))), ["bills"]);
        assert_eq!(
            routing_ids(&pool.filter_by_channel(None)),
            ["orders", "bills", "ord"]
        );
    }

    #[test]
    fn test_empty_prefix_never_matches() {
        let pool = ConsumerConfigPool::new();
        pool.push(config(""));

        assert!(pool.filter_by_channel(Some("orders")).is_empty());
        assert_eq!(pool.filter_by_channel(None).len(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_only_its_config() {
        let pool = ConsumerConfigPool::new();
        let orders = pool.push(config("orders"));
        pool.push(config("orders"));

        orders.unsubscribe();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.filter_by_channel(Some("orders")).len(), 1);
    }

    #[tokio::test]
    async fn test_consume_catches_panics() {
        let consumer = |_: Vec<Message>| async {
            if true {
                panic!("kitchen on fire");
            }
            Ok::<(), BoxError>(())
        };
        let config = ConsumerConfig::new(vec![], Arc::new(consumer), "chef".to_string());

        assert_eq!(
            config.consume(&[]).await,
            Err("consumer chef panicked".to_string())
        );
    }
}
