use courier_core::TransportError;
use thiserror::Error;

/// Errors that can occur when using the NATS transport.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport is closed.
    #[error("the transport is closed")]
    Closed,

    /// Error creating the durable pull consumer.
    #[error("NATS JetStream error creating consumer: {0}")]
    CreateConsumer(String),

    /// Error creating the work-queue stream.
    #[error("NATS JetStream error creating stream: {0}")]
    CreateStream(String),

    /// Error subscribing to the consumer's messages.
    #[error("NATS JetStream error reading messages: {0}")]
    Messages(String),

    /// Error publishing a packet or awaiting its ack.
    #[error("NATS JetStream publish error: {0}")]
    Publish(#[from] async_nats::jetstream::context::PublishError),
}

impl TransportError for Error {
    fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
