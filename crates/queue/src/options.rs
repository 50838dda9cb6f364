use std::time::Duration;

/// Configuration for a [`MessageQueue`](crate::MessageQueue).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageQueueOptions {
    /// Redeliveries granted to each failing consumer of one published batch.
    pub max_retry_attempts: u32,

    /// Window over which failed deliveries are buffered before being routed
    /// again. Must be non-zero; a zero window is raised to one millisecond.
    pub retry_interval: Duration,

    /// Age after which `warm_up` re-routes an envelope still pending.
    pub pending_message_max_age: Duration,

    /// Whether `open` runs `warm_up`.
    pub warm_up_on_open: bool,
}

impl Default for MessageQueueOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_interval: Duration::from_secs(5),
            pending_message_max_age: Duration::from_secs(60 * 60),
            warm_up_on_open: false,
        }
    }
}
