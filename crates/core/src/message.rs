use crate::Error;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single message carried by an envelope: either plain text or a
/// string-keyed record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A plain text message.
    Text(String),

    /// A record keyed by strings.
    Record(Map<String, Value>),
}

impl Message {
    /// Returns the text if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Record(_) => None,
        }
    }

    /// Returns the record if this is a record message.
    #[must_use]
    pub const fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Record(record) => Some(record),
            Self::Text(_) => None,
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(record: Map<String, Value>) -> Self {
        Self::Record(record)
    }
}

impl TryFrom<Value> for Message {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Object(record) => Ok(Self::Record(record)),
            other => Err(Error::Validation(format!(
                "a message must be a string or a record, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_try_from_value() {
        let record = Message::try_from(json!({ "table": 3, "meal": "risotto" })).unwrap();
        assert_eq!(
            record.as_record().and_then(|r| r.get("meal")),
            Some(&json!("risotto"))
        );

        let text = Message::try_from(json!("hello")).unwrap();
        assert_eq!(text.as_text(), Some("hello"));

        assert!(matches!(
            Message::try_from(json!(42)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Message::try_from(json!(["nested"])),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_untagged_serde() {
        let messages: Vec<Message> =
            serde_json::from_value(json!(["plain", { "broadcast": true }])).unwrap();

        assert_eq!(messages[0], Message::from("plain"));
        assert_eq!(
            messages[1].as_record().and_then(|r| r.get("broadcast")),
            Some(&json!(true))
        );
    }
}
