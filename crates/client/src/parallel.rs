//! Parallel upload through the `concatenation` extension.
//!
//! The source is cut into disjoint ranges. Each range gets its own
//! `partial` resource and its own driver over a [`WindowSource`]; no offset
//! state is shared between workers. Once every worker has stopped, a final
//! resource is assembled from the partials in range order.
//!
//! A run that stops early leaves its partials on the server and reports
//! them in a [`ParallelUploadError`]; [`TusClient::resume_parallel`] picks
//! them up again.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, warn};
use tuskit_protocol::Metadata;
use tuskit_transfer::{ByteSource, ChunkPlan, WindowSource, split_ranges};

use crate::client::TusClient;
use crate::error::{ParallelUploadError, PartialProgress, TusError, UploadError};
use crate::types::{UploadEvent, UploadOptions, UploadResult};

impl TusClient {
    /// Uploads `source` as `parts` concurrent partial uploads, then
    /// concatenates them.
    ///
    /// Events report whole-upload progress: one `ChunkAccepted` per
    /// finished part, carrying the bytes finished so far.
    pub async fn upload_parallel(
        &self,
        endpoint: &str,
        source: Arc<dyn ByteSource>,
        parts: usize,
        metadata: &Metadata,
        options: &UploadOptions,
    ) -> Result<UploadResult, TusError> {
        if parts == 0 {
            return Err(TusError::InvalidOptions("parts must be at least one".into()));
        }
        options.validate().map_err(TusError::InvalidOptions)?;

        let total = source.len();
        let ranges = split_ranges(total, parts);
        if ranges.is_empty() {
            // Nothing to split; an empty upload needs no partials.
            return self.upload_new(endpoint, source, metadata, options).await;
        }

        let mut partials = Vec::with_capacity(ranges.len());
        for range in &ranges {
            match self.create_partial(endpoint, range.len(), &Metadata::new()).await {
                Ok(location) => partials.push(location),
                Err(e) => {
                    warn!(endpoint, created = partials.len(), error = %e, "could not create partial upload");
                    self.discard(&partials).await;
                    return Err(e);
                }
            }
        }
        info!(endpoint, parts = partials.len(), total, "starting parallel upload");

        let plan = ranges.into_iter().zip(partials).collect();
        // Fresh partials start at zero; nothing to probe.
        self.run_parts(endpoint, source, plan, Some(0), metadata, options)
            .await
    }

    /// Finishes a parallel upload that stopped early.
    ///
    /// `partials` are the locations reported by the failed run, in order.
    /// Each part is probed and continued from the server's offset; parts
    /// already complete send no data.
    pub async fn resume_parallel(
        &self,
        endpoint: &str,
        source: Arc<dyn ByteSource>,
        partials: &[String],
        metadata: &Metadata,
        options: &UploadOptions,
    ) -> Result<UploadResult, TusError> {
        if partials.is_empty() {
            return Err(TusError::InvalidOptions("no partial uploads to resume".into()));
        }
        options.validate().map_err(TusError::InvalidOptions)?;

        let total = source.len();
        let ranges = split_ranges(total, partials.len());
        if ranges.len() != partials.len() {
            return Err(TusError::InvalidOptions(format!(
                "{} partial uploads cannot split {total} bytes",
                partials.len()
            )));
        }
        info!(endpoint, parts = partials.len(), total, "resuming parallel upload");

        let plan = ranges.into_iter().zip(partials.iter().cloned()).collect();
        self.run_parts(endpoint, source, plan, None, metadata, options)
            .await
    }

    async fn run_parts(
        &self,
        endpoint: &str,
        source: Arc<dyn ByteSource>,
        plan: Vec<(ChunkPlan, String)>,
        known_offset: Option<u64>,
        metadata: &Metadata,
        options: &UploadOptions,
    ) -> Result<UploadResult, TusError> {
        let total = source.len();
        options.emit(UploadEvent::Started { offset: 0, total }).await;

        // Workers share a child token so one failure stops the rest.
        let cancel = options.cancel.child_token();
        let worker_options = UploadOptions {
            known_offset,
            cancel: cancel.clone(),
            events: None,
            ..options.clone()
        };

        let mut workers = stream::iter(plan.iter().enumerate().map(|(index, (range, location))| {
            let source = Arc::clone(&source);
            let worker_options = &worker_options;
            async move {
                let window: Arc<dyn ByteSource> =
                    match WindowSource::new(source, range.start, range.len()) {
                        Ok(window) => Arc::new(window),
                        Err(e) => {
                            let err = UploadError {
                                location: location.clone(),
                                offset: 0,
                                source: e.into(),
                            };
                            return (index, Err(err));
                        }
                    };
                (index, self.upload(location, window, worker_options).await)
            }
        }))
        .buffer_unordered(plan.len());

        let mut reached = vec![0u64; plan.len()];
        let mut finished = 0u64;
        let mut first_error: Option<UploadError> = None;
        while let Some((index, result)) = workers.next().await {
            match result {
                Ok(offset) => {
                    reached[index] = offset;
                    finished += offset;
                    options.emit(UploadEvent::ChunkAccepted { offset: finished, total }).await;
                }
                Err(e) => {
                    reached[index] = e.offset;
                    if first_error.is_none() {
                        warn!(location = %e.location, error = %e, "partial upload failed, stopping siblings");
                        cancel.cancel();
                        first_error = Some(e);
                    } else {
                        debug!(location = %e.location, error = %e, "partial upload stopped");
                    }
                }
            }
        }
        drop(workers);

        let stopped = |source: TusError| -> TusError {
            ParallelUploadError {
                endpoint: endpoint.to_string(),
                parts: plan
                    .iter()
                    .zip(&reached)
                    .map(|((range, location), &offset)| PartialProgress {
                        location: location.clone(),
                        offset,
                        length: range.len(),
                    })
                    .collect(),
                source,
            }
            .into()
        };

        if let Some(err) = first_error {
            return Err(stopped(err.into()));
        }

        let locations: Vec<String> = plan.iter().map(|(_, location)| location.clone()).collect();
        let location = match self.concatenate(endpoint, &locations, metadata).await {
            Ok(location) => location,
            Err(e) => {
                warn!(endpoint, error = %e, "concatenation failed, partials kept");
                return Err(stopped(e));
            }
        };
        options.emit(UploadEvent::Completed { offset: total }).await;
        Ok(UploadResult {
            location,
            offset: total,
        })
    }

    /// Best-effort removal of partials that will never be concatenated.
    async fn discard(&self, partials: &[String]) {
        for location in partials {
            if let Err(e) = self.remove(location).await {
                warn!(location = %location, error = %e, "could not remove partial upload");
            }
        }
    }
}
