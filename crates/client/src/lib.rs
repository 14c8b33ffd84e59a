//! Resumable upload client for the tus 1.0.0 protocol.
//!
//! The client talks to the server through a [`Transport`]; production code
//! uses [`ReqwestTransport`], tests plug in an in-memory server.
//!
//! # Upload flow
//!
//! 1. **Discover**: `OPTIONS` the endpoint for version, extensions, limits
//! 2. **Create**: `POST` a new resource and receive its location
//! 3. **Upload**: `PATCH` chunks at the server's offset, probing with
//!    `HEAD` whenever the outcome of a chunk is unknown
//! 4. **Concatenate**: optionally merge parallel partial uploads

pub mod client;
mod driver;
pub mod error;
pub mod http;
#[cfg(test)]
mod mock;
mod parallel;
pub mod retry;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use client::{TusClient, resolve_location};
pub use error::{ParallelUploadError, PartialProgress, Rejection, TusError, UploadError};
pub use http::{HttpConfig, ReqwestTransport};
pub use retry::RetryPolicy;
pub use transport::{Request, Response, Transport, TransportError};
pub use types::{
    AppendOutcome, Download, OffsetInfo, TransferOptions, UploadEvent, UploadLength,
    UploadOptions, UploadResult,
};

pub use tokio_util::sync::CancellationToken;
pub use tuskit_protocol::{Extension, Metadata, ServerCapabilities};
pub use tuskit_transfer::{
    ByteSource, ChecksumAlgorithm, FileSource, MemorySource, WindowSource,
    calculate_file_checksum, checksum_bytes,
};
