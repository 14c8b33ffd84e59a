//! Option, event and result types for the upload client.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tuskit_protocol::{Concat, Extension, Headers, Metadata, ServerCapabilities};
use tuskit_transfer::{ChecksumAlgorithm, DEFAULT_CHUNK_SIZE};

use crate::error::Rejection;
use crate::retry::RetryPolicy;
use crate::transport::TransportError;

/// Declared size of a new upload resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadLength {
    Known(u64),
    /// Declared later, on the first append (`creation-defer-length`).
    Deferred,
}

/// Tunables for a single upload call.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Bytes per append request. Must be non-zero.
    pub chunk_size: usize,
    /// Attach `Upload-Checksum` to every append.
    pub checksum: Option<ChecksumAlgorithm>,
    /// Recovery cycles allowed between two accepted chunks.
    pub max_retries: u32,
    pub retry: RetryPolicy,
    /// Offset the caller already trusts. Skips the initial probe.
    pub known_offset: Option<u64>,
    pub cancel: CancellationToken,
    /// Progress events. A full channel slows the upload down but never
    /// holds it past cancellation; a dropped receiver is ignored.
    pub events: Option<mpsc::Sender<UploadEvent>>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum: None,
            max_retries: 3,
            retry: RetryPolicy::default(),
            known_offset: None,
            cancel: CancellationToken::new(),
            events: None,
        }
    }
}

impl UploadOptions {
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = Some(algorithm);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<UploadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Adjusts checksum use to what `caps` advertises.
    ///
    /// Without the `checksum` extension no digest is sent. With it, an
    /// algorithm the caller already picked is kept if the server knows it;
    /// otherwise the strongest common one is chosen.
    #[must_use]
    pub fn negotiated(mut self, caps: &ServerCapabilities) -> Self {
        if !caps.supports(&Extension::Checksum) {
            if self.checksum.take().is_some() {
                debug!("server lacks the checksum extension, sending chunks unverified");
            }
            return self;
        }
        let keep = self
            .checksum
            .filter(|algo| caps.supports_checksum_algorithm(algo.as_str()));
        self.checksum = keep.or_else(|| ChecksumAlgorithm::negotiate(&caps.checksum_algorithms));
        self
    }

    /// Delivers `event` if someone listens. Waits for room in the channel,
    /// but never past cancellation; a closed receiver is ignored.
    pub(crate) async fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tx.send(event) => {}
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".into());
        }
        Ok(())
    }
}

/// Options for [`TusClient::transfer`](crate::TusClient::transfer).
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub upload: UploadOptions,
    /// Negotiate a checksum algorithm with the server.
    pub checksum: bool,
    /// Partial uploads to run at once. Values above one need the
    /// `concatenation` extension, otherwise the upload runs sequentially.
    pub parallel: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            upload: UploadOptions::default(),
            checksum: true,
            parallel: 1,
        }
    }
}

/// Progress notifications emitted while uploading.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Server offset learned; chunks start from here.
    Started { offset: u64, total: u64 },
    ChunkAccepted { offset: u64, total: u64 },
    /// Tracked offset replaced by what the server reported.
    Resynced { from: u64, to: u64 },
    /// Backing off before recovery attempt `attempt`.
    Retrying { attempt: u32, delay: Duration },
    Completed { offset: u64 },
}

/// Server state of an upload resource, from a progress probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetInfo {
    pub offset: u64,
    /// `None` while the length is still deferred.
    pub length: Option<u64>,
    pub deferred: bool,
    pub metadata: Metadata,
    /// Raw `Upload-Expires` value.
    pub expires: Option<String>,
    pub concat: Option<Concat>,
}

impl OffsetInfo {
    pub fn is_complete(&self) -> bool {
        self.length == Some(self.offset)
    }
}

/// Body and headers of a completed upload.
#[derive(Debug, Clone)]
pub struct Download {
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Where a finished upload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub location: String,
    pub offset: u64,
}

/// Classified result of one append request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Server now holds `0..offset`.
    Accepted(u64),
    /// Server offset differs from the one sent. `None` when the response
    /// did not say where it is.
    Conflict(Option<u64>),
    Rejected(Rejection),
    /// Effect unknown; the chunk may or may not have been applied.
    TransportFailure(TransportError),
}
