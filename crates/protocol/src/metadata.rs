//! `Upload-Metadata` codec.
//!
//! The header is a comma separated list of `key base64(value)` pairs. A key
//! without a value is allowed and decodes to an empty string. Values are
//! arbitrary bytes on the wire; bytes that are not UTF-8 decode lossily.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::constants::UPLOAD_METADATA;
use crate::error::ProtocolError;

/// Metadata attached to an upload at creation time.
pub type Metadata = BTreeMap<String, String>;

/// Encodes metadata into the header value. Keys are emitted in sorted order.
pub fn encode_metadata(metadata: &Metadata) -> Result<String, ProtocolError> {
    let mut pairs = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        validate_key(key)?;
        if value.is_empty() {
            pairs.push(key.clone());
        } else {
            pairs.push(format!("{key} {}", STANDARD.encode(value.as_bytes())));
        }
    }
    Ok(pairs.join(","))
}

/// Decodes a header value produced by [`encode_metadata`] (or any server).
pub fn decode_metadata(raw: &str) -> Result<Metadata, ProtocolError> {
    let mut metadata = Metadata::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, ' ');
        let key = parts.next().unwrap_or_default();
        let value = match parts.next().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => {
                let bytes = STANDARD.decode(encoded).map_err(|_| invalid(raw))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            _ => String::new(),
        };
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

fn validate_key(key: &str) -> Result<(), ProtocolError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii() && !c.is_ascii_control() && c != ' ' && c != ',');
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidMetadataKey(key.to_string()))
    }
}

fn invalid(raw: &str) -> ProtocolError {
    ProtocolError::InvalidHeader {
        header: UPLOAD_METADATA,
        value: raw.to_string(),
    }
}
