//! Byte sources, chunk planning and digests for resumable uploads.

mod checksum;
mod plan;
mod progress;
mod source;

pub use checksum::{ChecksumAlgorithm, calculate_file_checksum, checksum_bytes};
pub use plan::{ChunkPlan, plan_chunk, split_ranges};
pub use progress::ThroughputMeter;
pub use source::{ByteSource, FileSource, MemorySource, WindowSource};

/// Default chunk size: 4 MiB.
///
/// Servers behind proxies often cap request bodies; callers lower this
/// through `UploadOptions::chunk_size`.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("range {offset}+{len} outside source of {total} bytes")]
    RangeOutOfBounds { offset: u64, len: usize, total: u64 },

    #[error("source lock poisoned")]
    Poisoned,

    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),
}
