use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of encoded packets emitted by a transport.
pub type Incoming = BoxStream<'static, String>;

/// Marker trait for transport errors.
pub trait TransportError: Debug + Error + Send + Sync + 'static {
    /// Whether the error reports an operation on a closed transport.
    fn is_closed(&self) -> bool;
}

/// Transport trait for fanning encoded packets out to attached routers.
///
/// Packets are opaque hex text. The transport decides when to emit a
/// previously routed packet through [`Transport::incoming`]; the queue only
/// reacts to emissions and never polls.
///
/// Implementations must make the receive feeding `incoming` destructive: at
/// most one attached receiver observes a given routed packet. Delivery
/// guarantees across queue instances sharing a backend rely on it, since
/// acknowledgement is best effort.
#[async_trait]
pub trait Transport: Clone + Debug + Send + Sync + 'static {
    /// The error type for the transport.
    type Error: TransportError;

    /// Opens the transport.
    async fn open(&self) -> Result<(), Self::Error>;

    /// Closes the transport, ending any stream returned by `incoming`.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Sends an encoded packet.
    async fn route(&self, packed_packet: String) -> Result<(), Self::Error>;

    /// Best-effort removal of a previously received packet.
    async fn remove(&self, packed_packet: String) -> Result<(), Self::Error>;

    /// Subscribes to packets emitted to this transport.
    async fn incoming(&self) -> Result<Incoming, Self::Error>;
}
