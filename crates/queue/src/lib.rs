//! Pluggable publish/subscribe message queue with at-least-once delivery,
//! per-consumer retry and durable tracking of in-flight messages.
//!
//! The queue is a library linked into every participant: durability is
//! delegated to a [`Store`] and fan-out to a [`Transport`], so several
//! processes sharing both act as competing consumers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod consumer_config_pool;
mod error;
mod garbage_collector;
mod message_queue;
mod options;
mod packet;
mod router;

pub use consumer::Consumer;
pub use consumer_config_pool::{ConsumerConfig, ConsumerConfigPool, Unsubscribe};
pub use error::{BoxError, Error};
pub use garbage_collector::GarbageCollector;
pub use message_queue::{MessageQueue, consumer_channel};
pub use options::MessageQueueOptions;
pub use packet::{Packet, PacketBag};
pub use router::{PacketBags, Router};

pub use courier_core::{Envelope, Message, Status, Store, Transport};
