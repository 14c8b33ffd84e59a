//! Codecs for the structured `Upload-Checksum` and `Upload-Concat` values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::constants::{UPLOAD_CHECKSUM, UPLOAD_CONCAT};
use crate::error::ProtocolError;

/// Formats `Upload-Checksum: <algorithm> <base64 digest>`.
pub fn encode_checksum(algorithm: &str, digest: &[u8]) -> String {
    format!("{algorithm} {}", STANDARD.encode(digest))
}

/// Splits an `Upload-Checksum` value into the algorithm name and raw digest.
pub fn decode_checksum(raw: &str) -> Result<(String, Vec<u8>), ProtocolError> {
    let invalid = || ProtocolError::InvalidHeader {
        header: UPLOAD_CHECKSUM,
        value: raw.to_string(),
    };
    let (algorithm, encoded) = raw.trim().split_once(' ').ok_or_else(invalid)?;
    let digest = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    if algorithm.is_empty() || digest.is_empty() {
        return Err(invalid());
    }
    Ok((algorithm.to_ascii_lowercase(), digest))
}

/// Value of the `Upload-Concat` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Concat {
    /// A partial upload that will later be concatenated.
    Partial,
    /// The final upload, built from the listed partial locations in order.
    Final(Vec<String>),
}

impl Concat {
    pub fn encode(&self) -> String {
        match self {
            Concat::Partial => "partial".to_string(),
            Concat::Final(parts) => format!("final;{}", parts.join(" ")),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let raw_trimmed = raw.trim();
        if raw_trimmed == "partial" {
            return Ok(Concat::Partial);
        }
        match raw_trimmed.strip_prefix("final;") {
            Some(list) => {
                let parts: Vec<String> = list.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    Err(ProtocolError::InvalidHeader {
                        header: UPLOAD_CONCAT,
                        value: raw.to_string(),
                    })
                } else {
                    Ok(Concat::Final(parts))
                }
            }
            None => Err(ProtocolError::InvalidHeader {
                header: UPLOAD_CONCAT,
                value: raw.to_string(),
            }),
        }
    }
}
