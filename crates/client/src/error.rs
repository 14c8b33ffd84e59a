//! Client error types.

use tuskit_protocol::ProtocolError;
use tuskit_protocol::constants::status;
use tuskit_transfer::TransferError;

use crate::transport::{Response, TransportError};

/// Explicit refusal by the server. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("upload exceeds the server size limit")]
    TooLarge,

    #[error("upload resource is gone")]
    Gone,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

impl Rejection {
    /// Maps a non-success response onto a rejection reason.
    pub fn from_response(resp: &Response) -> Self {
        match resp.status {
            status::CHECKSUM_MISMATCH => Rejection::ChecksumMismatch,
            status::PAYLOAD_TOO_LARGE => Rejection::TooLarge,
            s if status::is_gone(s) => Rejection::Gone,
            s => Rejection::Status {
                status: s,
                body: resp.body_text(),
            },
        }
    }
}

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum TusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("offset conflict: assumed {assumed}, server reported {reported:?}")]
    OffsetConflict { assumed: u64, reported: Option<u64> },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<TusError> },

    #[error("server declares {server} bytes but the source has {local}")]
    LengthMismatch { server: u64, local: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Upload(#[from] Box<UploadError>),

    #[error(transparent)]
    Parallel(#[from] Box<ParallelUploadError>),
}

impl TusError {
    /// Whether the failure came from cancellation, directly or from inside
    /// an upload.
    pub fn is_cancelled(&self) -> bool {
        match self {
            TusError::Cancelled => true,
            TusError::Upload(e) => e.source.is_cancelled(),
            TusError::Parallel(e) => e.source.is_cancelled(),
            _ => false,
        }
    }

    /// Rejection reason, if the server refused the request.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            TusError::Rejected(r) => Some(r),
            TusError::Upload(e) => e.source.rejection(),
            TusError::Parallel(e) => e.source.rejection(),
            _ => None,
        }
    }
}

/// An upload that stopped before completion.
///
/// Carries everything needed to resume: pass `location` to a fresh
/// upload call and it continues from `offset`.
#[derive(Debug, thiserror::Error)]
#[error("upload to {location} stopped at offset {offset}: {source}")]
pub struct UploadError {
    pub location: String,
    /// Last offset the server confirmed.
    pub offset: u64,
    pub source: TusError,
}

impl UploadError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

impl From<UploadError> for TusError {
    fn from(err: UploadError) -> Self {
        TusError::Upload(Box::new(err))
    }
}

/// Where one partial upload of a parallel upload stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialProgress {
    pub location: String,
    /// Bytes the server holds for this part.
    pub offset: u64,
    /// Bytes this part must reach.
    pub length: u64,
}

impl PartialProgress {
    pub fn is_complete(&self) -> bool {
        self.offset >= self.length
    }
}

/// A parallel upload that stopped before the final resource existed.
///
/// The partials are left on the server. Hand their locations, in order, to
/// `TusClient::resume_parallel` to finish the upload.
#[derive(Debug, thiserror::Error)]
#[error("parallel upload to {endpoint} stopped: {source}")]
pub struct ParallelUploadError {
    pub endpoint: String,
    /// One entry per range, in source order.
    pub parts: Vec<PartialProgress>,
    pub source: TusError,
}

impl ParallelUploadError {
    pub fn locations(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.location.clone()).collect()
    }
}

impl From<ParallelUploadError> for TusError {
    fn from(err: ParallelUploadError) -> Self {
        TusError::Parallel(Box::new(err))
    }
}
