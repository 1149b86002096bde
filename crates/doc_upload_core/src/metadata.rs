//! Codec for S3 custom object metadata.
//!
//! S3 lower-cases custom metadata keys, so the workflow stores every key and
//! value as the hex encoding of its UTF-8 bytes. The hex alphabet is
//! case-insensitive-safe and valid in HTTP headers, which the presigned
//! upload requires.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DecodeError {}

/// Encodes every key and value independently as lowercase hex.
pub fn encode_metadata(metadata: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .iter()
        .map(|(key, value)| (hex::encode(key), hex::encode(value)))
        .collect()
}

/// Inverse of [`encode_metadata`]. Decoding accepts upper- or lowercase hex
/// and fails on anything that is not hex or does not un-hex to UTF-8.
pub fn decode_metadata(
    metadata: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, DecodeError> {
    let mut decoded = BTreeMap::new();
    for (key, value) in metadata {
        decoded.insert(decode_string(key)?, decode_string(value)?);
    }
    Ok(decoded)
}

fn decode_string(encoded: &str) -> Result<String, DecodeError> {
    let bytes = hex::decode(encoded)
        .map_err(|error| DecodeError::new(format!("'{encoded}' is not valid hex: {error}")))?;
    String::from_utf8(bytes).map_err(|error| {
        DecodeError::new(format!("'{encoded}' does not decode to UTF-8: {error}"))
    })
}
