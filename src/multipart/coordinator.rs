//! Orchestration of large-file uploads
//!
//! The coordinator plans part ranges once up front, uploads them as
//! semaphore-bounded tokio tasks, records results into index-ordered slots,
//! and finalizes only when every part is in. Completion order is
//! network-dependent and deliberately unconstrained; the digest list handed
//! to `b2_finish_large_file` is always in part-index order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{B2Error, Result};
use crate::multipart::part::{upload_one_part, PartResult};
use crate::multipart::planner::{plan_parts, PartRange};
use crate::multipart::source::ContentSource;
use crate::multipart::transport::LargeFileTransport;
use crate::types::FileInfo;

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information, reported as parts complete
#[derive(Clone, Debug)]
pub struct UploadProgress {
    /// Bytes uploaded so far
    pub bytes_uploaded: u64,
    /// Total bytes to upload
    pub total_bytes: u64,
    /// Parts recorded so far
    pub parts_completed: u32,
    /// Total number of parts
    pub total_parts: u32,
}

impl UploadProgress {
    /// Get percentage complete
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Tuning knobs for a large-file upload
pub struct UploadOptions {
    /// MIME type; `None` lets the server sniff (`b2/x-auto`)
    pub content_type: Option<String>,
    /// Part size in bytes; `None` uses the session's recommended size
    pub part_size: Option<u64>,
    /// Maximum parts in flight at once
    pub concurrency: usize,
    /// Attempts per part before the upload is aborted
    pub part_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Time limit per upload attempt; a breach counts as a transient failure
    pub part_timeout: Option<Duration>,
    /// Time limit for the whole upload; a breach cancels it
    pub deadline: Option<Duration>,
    /// Progress callback, invoked as parts complete
    pub progress: Option<ProgressCallback>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            part_size: None,
            concurrency: 4,
            part_attempts: 3,
            backoff_base: Duration::from_millis(200),
            part_timeout: None,
            deadline: None,
            progress: None,
        }
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Sources that only support sequential reads must use a concurrency of 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_part_attempts(mut self, part_attempts: u32) -> Self {
        self.part_attempts = part_attempts;
        self
    }

    pub fn with_part_timeout(mut self, part_timeout: Duration) -> Self {
        self.part_timeout = Some(part_timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Signals cancellation to an in-progress upload.
///
/// Cancelling stops new parts from launching and interrupts waiting and
/// in-flight part tasks at their next suspension point; the upload returns
/// with [`B2Error::Cancelled`] as the cause and finalize is never called.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the handle is cancelled; never resolves otherwise.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone without cancelling; nothing left to wait for.
        std::future::pending::<()>().await;
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Planning,
    Starting,
    InFlight,
    Finalizing,
    Completed,
    Failed,
}

/// Mutable state of one large-file upload. The file ID is assigned by
/// `start_large_file`, part slots fill as uploads complete (possibly out of
/// order), and the whole session is discarded on finalize or failure.
struct UploadSession {
    file_id: String,
    state: SessionState,
    slots: Vec<Option<PartResult>>,
}

impl UploadSession {
    fn new(total_parts: usize) -> Self {
        Self {
            file_id: String::new(),
            state: SessionState::Planning,
            slots: vec![None; total_parts],
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            !matches!(self.state, SessionState::Completed | SessionState::Failed),
            "no transitions out of a terminal state"
        );
        debug!(file_id = %self.file_id, from = ?self.state, to = ?next, "upload session state");
        self.state = next;
    }

    fn record(&mut self, result: PartResult) {
        let index = result.index as usize;
        if index < self.slots.len() {
            self.slots[index] = Some(result);
        }
    }

    fn completed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn completed_indices(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| index as u32)
            .collect()
    }

    fn incomplete_indices(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u32)
            .collect()
    }

    /// Digests in part-index order, or `None` while any part is missing.
    fn ordered_sha1s(&self) -> Option<Vec<String>> {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map(|result| result.content_sha1.clone()))
            .collect()
    }
}

/// Coordinates a whole large-file upload against a [`LargeFileTransport`].
pub struct LargeFileUploader {
    transport: Arc<dyn LargeFileTransport>,
    opts: UploadOptions,
    cancel: CancelHandle,
}

impl LargeFileUploader {
    pub fn new(transport: Arc<dyn LargeFileTransport>, opts: UploadOptions) -> Self {
        Self {
            transport,
            opts,
            cancel: CancelHandle::new(),
        }
    }

    /// Handle for aborting this upload from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Upload `source` as a large file and return the finalized descriptor.
    ///
    /// On failure the error is [`B2Error::LargeFileFailed`], naming the first
    /// fatal cause and which part indices did and did not complete. Parts
    /// already uploaded are left in place; the service expires unfinished
    /// large files on its own schedule.
    pub async fn upload(
        &self,
        source: Arc<dyn ContentSource>,
        bucket_id: &str,
        file_name: &str,
    ) -> Result<FileInfo> {
        let _deadline_guard = self.opts.deadline.map(|deadline| {
            let cancel = self.cancel.clone();
            AbortOnDrop(tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!("upload deadline reached, cancelling");
                cancel.cancel();
            }))
        });

        self.run(source, bucket_id, file_name).await
    }

    async fn run(
        &self,
        source: Arc<dyn ContentSource>,
        bucket_id: &str,
        file_name: &str,
    ) -> Result<FileInfo> {
        // Planning
        let content_length = source.content_length().await?;
        if content_length == 0 {
            return Err(B2Error::Config(
                "large-file upload requires a non-empty source".to_string(),
            ));
        }
        let part_size = match self.opts.part_size {
            Some(part_size) => part_size,
            None => self.transport.recommended_part_size().await?,
        };
        let ranges = plan_parts(content_length, part_size)?;
        let total_parts = ranges.len() as u32;
        let mut session = UploadSession::new(ranges.len());

        // Starting
        session.advance(SessionState::Starting);
        let content_type = self
            .opts
            .content_type
            .as_deref()
            .unwrap_or(super::AUTO_CONTENT_TYPE);
        let started = self
            .transport
            .start_large_file(bucket_id, file_name, content_type)
            .await?;
        session.file_id = started.file_id.clone();
        debug!(
            file_id = %started.file_id,
            parts = total_parts,
            part_size,
            content_length,
            "large file started"
        );

        session.advance(SessionState::InFlight);

        // InFlight: one task per range, gated by the semaphore
        let semaphore = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let mut tasks: JoinSet<std::result::Result<PartResult, (u32, B2Error)>> = JoinSet::new();
        for range in ranges {
            tasks.spawn(self.part_task(
                Arc::clone(&source),
                started.file_id.clone(),
                range,
                Arc::clone(&semaphore),
            ));
        }

        // Results arrive in completion order; slots keep them in index order.
        // Joining on the single coordinator task serializes all session
        // mutation. The first fatal error wins and cancels the rest.
        let mut first_error: Option<B2Error> = None;
        let mut bytes_uploaded = 0u64;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    bytes_uploaded += result.size;
                    session.record(result);
                    if let Some(progress) = &self.opts.progress {
                        progress(UploadProgress {
                            bytes_uploaded,
                            total_bytes: content_length,
                            parts_completed: session.completed_count() as u32,
                            total_parts,
                        });
                    }
                }
                Ok(Err((index, error))) => {
                    if first_error.is_none() {
                        warn!(part = index + 1, error = %error, "part upload failed, aborting");
                        first_error = Some(error);
                        self.cancel.cancel();
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error =
                            Some(B2Error::UploadFailed(format!("part task died: {join_error}")));
                        self.cancel.cancel();
                    }
                }
            }
        }

        // A caller-side cancel with no failed part still forbids finalize.
        if first_error.is_none() && self.cancel.is_cancelled() {
            first_error = Some(B2Error::Cancelled);
        }

        if let Some(cause) = first_error {
            session.advance(SessionState::Failed);
            return Err(B2Error::LargeFileFailed {
                cause: Box::new(cause),
                completed: session.completed_indices(),
                incomplete: session.incomplete_indices(),
            });
        }

        // Finalizing
        session.advance(SessionState::Finalizing);
        let Some(part_sha1_array) = session.ordered_sha1s() else {
            return Err(B2Error::UploadFailed(
                "part results missing after all tasks completed".to_string(),
            ));
        };
        let finished = self
            .transport
            .finish_large_file(&session.file_id, &part_sha1_array)
            .await?;
        session.advance(SessionState::Completed);
        debug!(file_id = %finished.file_id, "large file finished");
        Ok(finished)
    }

    fn part_task(
        &self,
        source: Arc<dyn ContentSource>,
        file_id: String,
        range: PartRange,
        semaphore: Arc<Semaphore>,
    ) -> impl Future<Output = std::result::Result<PartResult, (u32, B2Error)>> + Send + 'static
    {
        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();
        let attempts = self.opts.part_attempts.max(1);
        let backoff_base = self.opts.backoff_base;
        let part_timeout = self.opts.part_timeout;

        async move {
            // A cancelled upload stops issuing new parts: the permit wait
            // races the cancel signal, and cancel wins a tie.
            let _permit = tokio::select! {
                biased;
                _ = cancelled(cancel.watch()) => return Err((range.index, B2Error::Cancelled)),
                permit = semaphore.acquire_owned() => {
                    permit.map_err(|_| (range.index, B2Error::Cancelled))?
                }
            };

            upload_part_with_retry(
                transport,
                source,
                cancel,
                &file_id,
                range,
                attempts,
                backoff_base,
                part_timeout,
            )
            .await
            .map_err(|error| (range.index, error))
        }
    }
}

/// Retry loop for one part. Transient failures back off exponentially and
/// re-request a fresh upload URL on the next attempt; fatal errors and
/// cancellation surface immediately.
#[allow(clippy::too_many_arguments)]
async fn upload_part_with_retry(
    transport: Arc<dyn LargeFileTransport>,
    source: Arc<dyn ContentSource>,
    cancel: CancelHandle,
    file_id: &str,
    range: PartRange,
    attempts: u32,
    backoff_base: Duration,
    part_timeout: Option<Duration>,
) -> Result<PartResult> {
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(B2Error::Cancelled);
        }

        let one_attempt = attempt_with_timeout(
            part_timeout,
            upload_one_part(transport.as_ref(), source.as_ref(), file_id, range, None),
        );
        // An attempt that has already produced its result wins a tie against
        // cancellation, so finished parts are never dropped on the floor.
        let result = tokio::select! {
            biased;
            result = one_attempt => result,
            _ = cancelled(cancel.watch()) => return Err(B2Error::Cancelled),
        };

        match result {
            Ok(part) => return Ok(part),
            Err(error) if error.is_transient() && attempt < attempts => {
                let delay = backoff_base * 2u32.saturating_pow(attempt - 1);
                debug!(
                    part = range.part_number(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient part failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn attempt_with_timeout<F>(part_timeout: Option<Duration>, attempt: F) -> Result<PartResult>
where
    F: Future<Output = Result<PartResult>>,
{
    match part_timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(B2Error::Api {
                status: 408,
                code: "request_timeout".to_string(),
                message: "part upload attempt timed out".to_string(),
            }),
        },
        None => attempt.await,
    }
}
