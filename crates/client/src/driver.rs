//! Chunked upload state machine.
//!
//! One [`UploadDriver`] runs one upload call. It owns the tracked offset
//! and only moves it on server evidence: an accepted append, the offset in
//! a conflict response, or a progress probe. Anything ambiguous (a lost
//! response, a 5xx) is resolved by probing, never by resending blindly.
//!
//! ```text
//! Idle -> Planning -> Sending -> Confirmed  -> Planning | Done
//!                             -> Conflicted -> Planning
//!                             -> Failed     -> Planning (after probe)
//!                             -> Aborted
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use tuskit_protocol::ProtocolError;
use tuskit_transfer::{ByteSource, ChunkPlan, plan_chunk};

use crate::client::TusClient;
use crate::error::{TusError, UploadError};
use crate::types::{AppendOutcome, OffsetInfo, UploadEvent, UploadOptions};

#[derive(Debug)]
enum State {
    /// Server offset not known yet.
    Idle,
    Planning,
    Sending(ChunkPlan),
    /// Server accepted the chunk and holds `0..offset`.
    Confirmed(u64),
    /// Server is somewhere else; `None` if it did not say where.
    Conflicted(Option<u64>),
    /// Outcome unknown; back off, then probe.
    Failed(TusError),
    Done,
    Aborted(TusError),
}

pub(crate) struct UploadDriver<'a> {
    client: &'a TusClient,
    location: &'a str,
    source: Arc<dyn ByteSource>,
    options: &'a UploadOptions,
    total: u64,
    /// Last offset the server confirmed.
    offset: u64,
    /// Send `Upload-Length` with the next append.
    declare_length: bool,
    /// Recovery cycles since the offset last moved forward.
    failures: u32,
    started: bool,
}

impl<'a> UploadDriver<'a> {
    pub(crate) fn new(
        client: &'a TusClient,
        location: &'a str,
        source: Arc<dyn ByteSource>,
        options: &'a UploadOptions,
    ) -> Self {
        let total = source.len();
        Self {
            client,
            location,
            source,
            options,
            total,
            offset: 0,
            declare_length: false,
            failures: 0,
            started: false,
        }
    }

    pub(crate) async fn run(mut self) -> Result<u64, UploadError> {
        let mut state = State::Idle;
        loop {
            state = match state {
                State::Idle => self.start().await,
                State::Planning => self.plan(),
                State::Sending(plan) => self.send(plan).await,
                State::Confirmed(offset) => self.confirm(offset).await,
                State::Conflicted(reported) => self.resolve_conflict(reported).await,
                State::Failed(cause) => self.recover(cause).await,
                State::Done => return Ok(self.finish().await),
                State::Aborted(err) => return Err(self.abort(err)),
            };
        }
    }

    async fn start(&mut self) -> State {
        if let Err(reason) = self.options.validate() {
            return State::Aborted(TusError::InvalidOptions(reason));
        }
        if self.options.cancel.is_cancelled() {
            return State::Aborted(TusError::Cancelled);
        }
        match self.options.known_offset {
            Some(offset) if offset > self.total => State::Aborted(TusError::InvalidOptions(
                format!("known offset {offset} is past the source length {}", self.total),
            )),
            Some(offset) => self.adopt(offset).await,
            None => self.probe().await,
        }
    }

    fn plan(&mut self) -> State {
        if self.offset >= self.total && !self.declare_length {
            return State::Done;
        }
        if self.options.cancel.is_cancelled() {
            return State::Aborted(TusError::Cancelled);
        }
        // Empty plan: a deferred-length upload of zero bytes still has to
        // declare its length.
        let plan = plan_chunk(self.offset, self.total, self.options.chunk_size).unwrap_or(
            ChunkPlan {
                start: self.offset,
                end: self.offset,
            },
        );
        State::Sending(plan)
    }

    async fn send(&mut self, plan: ChunkPlan) -> State {
        let data = match self.read(plan).await {
            Ok(data) => data,
            Err(e) => return State::Aborted(e),
        };
        debug!(
            location = %self.location,
            start = plan.start,
            end = plan.end,
            total = self.total,
            "sending chunk"
        );

        let declare = self.declare_length.then_some(self.total);
        let outcome = self
            .client
            .append(self.location, plan.start, data, self.options.checksum, declare)
            .await;
        match outcome {
            Ok(AppendOutcome::Accepted(offset)) if offset == plan.end => State::Confirmed(offset),
            Ok(AppendOutcome::Accepted(actual)) => State::Aborted(
                ProtocolError::UnexpectedOffset {
                    expected: plan.end,
                    actual,
                }
                .into(),
            ),
            Ok(AppendOutcome::Conflict(reported)) => State::Conflicted(reported),
            Ok(AppendOutcome::Rejected(reason)) => State::Aborted(reason.into()),
            Ok(AppendOutcome::TransportFailure(e)) => State::Failed(e.into()),
            Err(e) => State::Aborted(e.into()),
        }
    }

    async fn read(&self, plan: ChunkPlan) -> Result<Vec<u8>, TusError> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let source = Arc::clone(&self.source);
        // Never larger than chunk_size, which is a usize.
        let len = plan.len() as usize;
        let data = tokio::task::spawn_blocking(move || source.read_range(plan.start, len)).await??;
        Ok(data)
    }

    async fn confirm(&mut self, offset: u64) -> State {
        self.offset = offset;
        self.failures = 0;
        self.declare_length = false;
        self.emit(UploadEvent::ChunkAccepted {
            offset,
            total: self.total,
        })
        .await;
        State::Planning
    }

    async fn resolve_conflict(&mut self, reported: Option<u64>) -> State {
        let cause = TusError::OffsetConflict {
            assumed: self.offset,
            reported,
        };
        if self.exhausted() {
            return self.give_up(cause);
        }
        warn!(
            location = %self.location,
            assumed = self.offset,
            reported = ?reported,
            "offset conflict"
        );
        match reported {
            // Nothing to adopt; resending at once would just hit the same wall.
            Some(offset) if offset == self.offset => {
                let attempt = self.failures;
                let delay = self.options.retry.delay_for_attempt(attempt);
                if !self.back_off(attempt, delay).await {
                    return State::Aborted(TusError::Cancelled);
                }
                State::Planning
            }
            Some(offset) => self.adopt(offset).await,
            None => self.probe().await,
        }
    }

    async fn recover(&mut self, cause: TusError) -> State {
        if self.exhausted() {
            return self.give_up(cause);
        }
        let attempt = self.failures;
        let delay = self.options.retry.delay_for_attempt(attempt);
        warn!(
            location = %self.location,
            offset = self.offset,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "upload interrupted, re-probing"
        );
        if !self.back_off(attempt, delay).await {
            return State::Aborted(TusError::Cancelled);
        }
        self.probe().await
    }

    /// Sleeps for `delay`; false if cancelled first.
    async fn back_off(&self, attempt: u32, delay: Duration) -> bool {
        self.emit(UploadEvent::Retrying { attempt, delay }).await;
        tokio::select! {
            _ = self.options.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn probe(&mut self) -> State {
        match self.client.probe(self.location).await {
            Ok(info) => self.adopt_probe(info).await,
            Err(e @ TusError::Transport(_)) => State::Failed(e),
            Err(e) => State::Aborted(e),
        }
    }

    async fn adopt_probe(&mut self, info: OffsetInfo) -> State {
        match info.length {
            Some(length) if length != self.total => {
                return State::Aborted(TusError::LengthMismatch {
                    server: length,
                    local: self.total,
                });
            }
            Some(_) => self.declare_length = false,
            None => self.declare_length = true,
        }
        self.adopt(info.offset).await
    }

    /// Replaces the tracked offset with one the server reported.
    async fn adopt(&mut self, offset: u64) -> State {
        if offset > self.total {
            return State::Aborted(
                ProtocolError::OffsetBeyondLength {
                    offset,
                    length: self.total,
                }
                .into(),
            );
        }

        if !self.started {
            self.started = true;
            self.offset = offset;
            debug!(location = %self.location, offset, total = self.total, "upload started");
            self.emit(UploadEvent::Started {
                offset,
                total: self.total,
            })
            .await;
            return State::Planning;
        }

        if offset != self.offset {
            if offset < self.offset {
                warn!(
                    location = %self.location,
                    from = self.offset,
                    to = offset,
                    "server offset moved backwards"
                );
            }
            self.emit(UploadEvent::Resynced {
                from: self.offset,
                to: offset,
            })
            .await;
            if offset > self.offset {
                self.failures = 0;
            }
            self.offset = offset;
        }
        State::Planning
    }

    /// Counts one non-accepted cycle; true once the budget is spent.
    fn exhausted(&mut self) -> bool {
        self.failures += 1;
        self.failures > self.options.max_retries
    }

    fn give_up(&self, last: TusError) -> State {
        State::Aborted(TusError::RetriesExhausted {
            attempts: self.failures,
            last: Box::new(last),
        })
    }

    async fn finish(&mut self) -> u64 {
        info!(location = %self.location, offset = self.offset, "upload complete");
        self.emit(UploadEvent::Completed {
            offset: self.offset,
        })
        .await;
        self.offset
    }

    fn abort(&self, err: TusError) -> UploadError {
        if err.is_cancelled() {
            info!(location = %self.location, offset = self.offset, "upload cancelled");
        } else {
            warn!(location = %self.location, offset = self.offset, error = %err, "upload aborted");
        }
        UploadError {
            location: self.location.to_string(),
            offset: self.offset,
            source: err,
        }
    }

    async fn emit(&self, event: UploadEvent) {
        self.options.emit(event).await;
    }
}
