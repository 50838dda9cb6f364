use crate::BoxError;

use std::future::Future;

use async_trait::async_trait;
use courier_core::Message;

/// A subscriber invoked with the message batch of every matching envelope.
///
/// An `Err` (or a panic) marks the delivery as failed for this consumer only
/// and schedules a retry on its private channel.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Processes one message batch.
    async fn consume(&self, messages: &[Message]) -> Result<(), BoxError>;

    /// Stable label used to build the consumer's private retry channel when
    /// none is given at subscribe time.
    ///
    /// Defaults to the type name, which is shared by every instance of a type
    /// (and by closures defined in the same function). Pass an explicit
    /// routing id when subscribing several of those to one queue.
    fn routing_id(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

#[async_trait]
impl<F, Fut> Consumer for F
where
    F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn consume(&self, messages: &[Message]) -> Result<(), BoxError> {
        (self)(messages.to_vec()).await
    }
}
