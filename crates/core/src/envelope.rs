use crate::codec::{decode_hex, encode_hex};
use crate::{Error, Message};

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery status of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Persisted, not yet handed to the transport.
    Pending,

    /// The transport refused the packet.
    NotRouted,

    /// Handed to the transport, awaiting delivery.
    InFlight,

    /// Every matched consumer succeeded.
    Delivered,

    /// The only matched consumer failed.
    NotDelivered,

    /// Some, but not all, matched consumers failed.
    PartiallyDelivered,
}

impl Status {
    /// Statuses marking a concluded delivery attempt, eligible for garbage
    /// collection.
    pub const TERMINAL: [Self; 4] = [
        Self::Delivered,
        Self::NotDelivered,
        Self::NotRouted,
        Self::PartiallyDelivered,
    ];

    /// Whether the delivery attempt has concluded.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InFlight)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        next.rank() >= self.rank()
    }

    /// The snake case name used on the wire and in stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NotRouted => "not_routed",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::NotDelivered => "not_delivered",
            Self::PartiallyDelivered => "partially_delivered",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InFlight => 1,
            Self::NotRouted | Self::Delivered | Self::NotDelivered | Self::PartiallyDelivered => 2,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// The durable record of one published message batch and its delivery status.
///
/// The message batch is immutable once the envelope exists: retries build a
/// new envelope with [`Envelope::clone_to`] which shares the same batch.
/// Only [`Envelope::update`] mutates an envelope, and only forwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    channel: Option<String>,
    error: Option<String>,
    id: String,
    messages: Arc<[Message]>,
    retry_attempts: u32,
    status: Status,
    updated_at: DateTime<Utc>,
}

impl Envelope {
    /// Creates a pending envelope with a fresh id.
    ///
    /// A `None` channel is a broadcast to every subscribed consumer.
    #[must_use]
    pub fn new(channel: Option<String>, messages: Vec<Message>) -> Self {
        Self {
            channel,
            error: None,
            id: Uuid::new_v4().as_hyphenated().to_string(),
            messages: messages.into(),
            retry_attempts: 0,
            status: Status::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Creates a pending envelope from an untyped message batch.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] unless `messages` is an array whose items
    /// are all strings or records.
    pub fn from_value(channel: Option<String>, messages: Value) -> Result<Self, Error> {
        let Value::Array(items) = messages else {
            return Err(Error::Validation("messages should be an array".to_string()));
        };

        let messages = items
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(channel, messages))
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Sets the last failure detail.
    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    /// Sets the number of redelivery attempts already consumed.
    #[must_use]
    pub const fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    /// Sets the last modification time, used when restoring from a store.
    #[must_use]
    pub const fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// The opaque unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The channel, `None` for a broadcast.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// The message batch.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Redelivery attempts already consumed by this envelope's lineage.
    #[must_use]
    pub const fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// The current delivery status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// The last failure detail, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// When the envelope was built or last updated.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves the envelope to `status`, replacing the failure detail.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] if `status` would move the envelope
    /// backwards (for example from `in_flight` to `pending`).
    pub fn update(&mut self, status: Status, error: Option<String>) -> Result<&mut Self, Error> {
        if !self.status.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        self.status = status;
        self.error = error;
        self.updated_at = Utc::now();

        Ok(self)
    }

    /// Builds a new pending envelope addressed to `channel` that shares this
    /// envelope's message batch and failure detail.
    #[must_use]
    pub fn clone_to(&self, channel: Option<String>, retry_attempts: u32) -> Self {
        Self {
            channel,
            error: self.error.clone(),
            id: Uuid::new_v4().as_hyphenated().to_string(),
            messages: Arc::clone(&self.messages),
            retry_attempts,
            status: Status::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Returns a copy whose messages are each encoded as hex text.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if a message cannot be serialized.
    pub fn pack(&self) -> Result<Self, Error> {
        let messages = self
            .messages
            .iter()
            .map(|message| encode_hex(message).map(Message::Text))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.with_messages(messages))
    }

    /// Decodes each packed message independently.
    #[must_use]
    pub fn unpack_each(&self) -> Vec<Result<Message, Error>> {
        self.messages
            .iter()
            .map(|message| match message {
                Message::Text(packed) => decode_hex(packed),
                Message::Record(_) => Err(Error::Decode(
                    "a packed message must be hex text".to_string(),
                )),
            })
            .collect()
    }

    /// Returns a copy with every packed message decoded.
    ///
    /// # Errors
    /// Returns the first [`Error::Decode`] among the messages.
    pub fn unpack(&self) -> Result<Self, Error> {
        let messages = self.unpack_each().into_iter().collect::<Result<Vec<_>, _>>()?;

        Ok(self.with_messages(messages))
    }

    fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            channel: self.channel.clone(),
            error: self.error.clone(),
            id: self.id.clone(),
            messages: messages.into(),
            retry_attempts: self.retry_attempts,
            status: self.status,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use serde_json::json;

    fn order() -> Vec<Message> {
        vec![Message::try_from(json!({ "table": 7 })).unwrap()]
    }

    #[test]
    fn test_from_value_requires_an_array() {
        assert_matches!(
            Envelope::from_value(Some("order".to_string()), json!({ "table": 7 })),
            Err(Error::Validation(reason)) if reason == "messages should be an array"
        );
        assert!(Envelope::from_value(Some("order".to_string()), json!([{ "table": 7 }])).is_ok());
    }

    #[test]
    fn test_from_value_rejects_invalid_items() {
        assert_matches!(
            Envelope::from_value(None, json!(["ok", 3])),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn test_new_envelope_is_pending() {
        let envelope = Envelope::new(Some("order".to_string()), order());

        assert_eq!(envelope.status(), Status::Pending);
        assert_eq!(envelope.retry_attempts(), 0);
        assert_eq!(envelope.error(), None);
        assert!(!envelope.id().is_empty());
        assert_ne!(envelope.id(), Envelope::new(None, order()).id());
    }

    #[test]
    fn test_update_is_fluent_and_monotonic() {
        let mut envelope = Envelope::new(Some("order".to_string()), order());

        let status = envelope
            .update(Status::InFlight, None)
            .unwrap()
            .update(Status::PartiallyDelivered, Some("Oops!".to_string()))
            .unwrap()
            .status();
        assert_eq!(status, Status::PartiallyDelivered);
        assert_eq!(envelope.error(), Some("Oops!"));

        assert_matches!(
            envelope.update(Status::Pending, None),
            Err(Error::InvalidTransition {
                from: Status::PartiallyDelivered,
                to: Status::Pending
            })
        );
        assert_eq!(envelope.status(), Status::PartiallyDelivered);

        envelope.update(Status::Delivered, None).unwrap();
        assert_eq!(envelope.error(), None);
    }

    #[test]
    fn test_clone_to_shares_batch_and_resets_status() {
        let mut original = Envelope::new(Some("orders".to_string()), order());
        original
            .update(Status::NotDelivered, Some("Oops!".to_string()))
            .unwrap();

        let retry = original.clone_to(Some("private".to_string()), 1);

        assert_ne!(retry.id(), original.id());
        assert_eq!(retry.channel(), Some("private"));
        assert_eq!(retry.retry_attempts(), 1);
        assert_eq!(retry.status(), Status::Pending);
        assert_eq!(retry.error(), Some("Oops!"));
        assert!(std::ptr::eq(retry.messages(), original.messages()));
        assert_eq!(original.status(), Status::NotDelivered);
    }

    #[test]
    fn test_pack_then_unpack() {
        let envelope = Envelope::new(
            None,
            vec![
                Message::from("plain"),
                Message::try_from(json!({ "table": 3, "meal": "risotto" })).unwrap(),
            ],
        );

        let packed = envelope.pack().unwrap();
        assert_eq!(packed.id(), envelope.id());
        assert!(packed.messages().iter().all(|m| m
            .as_text()
            .is_some_and(|t| t.chars().all(|c| c.is_ascii_hexdigit()))));

        assert_eq!(packed.unpack().unwrap(), envelope);
    }

    #[test]
    fn test_unpack_isolates_corrupt_messages() {
        let packed = Envelope::new(None, vec![Message::from("first"), Message::from("second")])
            .pack()
            .unwrap();
        let mut messages = packed.messages().to_vec();
        messages[0] = Message::from("zz-not-hex");
        let corrupted = packed.with_messages(messages);

        let decoded = corrupted.unpack_each();

        assert_matches!(decoded[0], Err(Error::Decode(_)));
        assert_eq!(decoded[1], Ok(Message::from("second")));
        assert_matches!(corrupted.unpack(), Err(Error::Decode(_)));
    }

    #[test]
    fn test_terminal_statuses() {
        for status in Status::TERMINAL {
            assert!(status.is_terminal());
        }
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::InFlight.is_terminal());
        assert!(Status::Pending.can_transition_to(Status::NotRouted));
        assert!(Status::InFlight.can_transition_to(Status::NotRouted));
        assert!(!Status::Delivered.can_transition_to(Status::InFlight));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(Status::PartiallyDelivered.to_string(), "partially_delivered");
        assert_eq!(
            serde_json::to_value(Status::NotRouted).unwrap(),
            json!("not_routed")
        );
    }
}
