/// Errors produced while encoding or decoding protocol headers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid {header} header: {value:?}")]
    InvalidHeader { header: &'static str, value: String },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid metadata key: {0:?}")]
    InvalidMetadataKey(String),

    #[error("server acknowledged offset {actual}, expected {expected}")]
    UnexpectedOffset { expected: u64, actual: u64 },

    #[error("server offset {offset} exceeds upload length {length}")]
    OffsetBeyondLength { offset: u64, length: u64 },
}
