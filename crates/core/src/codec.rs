use crate::Error;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes `value` as CBOR and renders the bytes as lowercase hex text.
///
/// Hex text keeps raw-string equality meaningful, which the router relies on
/// for duplicate suppression and transports rely on for `remove`.
///
/// # Errors
/// Returns [`Error::Encode`] if the value cannot be serialized.
pub fn encode_hex<T>(value: &T) -> Result<String, Error>
where
    T: Serialize + ?Sized,
{
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| Error::Encode(e.to_string()))?;

    Ok(hex::encode(bytes))
}

/// Decodes hex text produced by [`encode_hex`].
///
/// # Errors
/// Returns [`Error::Decode`] if the text is not hex or the bytes are not a
/// valid CBOR rendering of `T`.
pub fn decode_hex<T>(text: &str) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let bytes = hex::decode(text).map_err(|e| Error::Decode(e.to_string()))?;

    ciborium::from_reader(bytes.as_slice()).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    #[test]
    fn test_encoded_text_is_hex() {
        let mut packet = BTreeMap::new();
        packet.insert("id", "abc");

        let encoded = encode_hex(&packet).unwrap();

        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(encoded, encode_hex(&packet).unwrap());

        let decoded: BTreeMap<String, String> = decode_hex(&encoded).unwrap();
        assert_eq!(decoded.get("id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        let result: Result<String, Error> = decode_hex("not hex at all");

        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_cbor() {
        let encoded = encode_hex("a fairly long string").unwrap();
        let truncated = &encoded[..encoded.len() - 4];

        let result: Result<String, Error> = decode_hex(truncated);

        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
