// src/uploads/driver.rs
//! Runs one record's transfer: attempts, backoff between them, cancellation.

use backoff::backoff::Backoff;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::queue::UploadQueue;
use super::transfer::{TransferError, TransferEvent, TransferExecutor, TransferStream};
use crate::config::RetryPolicy;
use crate::models::{FileHandle, UploadId, UploadStatus};

enum AttemptOutcome {
    Completed,
    Failed(TransferError),
    Cancelled,
}

/// Drive `id` until it reaches a terminal status and return that status.
///
/// Progress only ever moves forward: a retried attempt that restarts from 0%
/// leaves the record at its previous high-water mark until it passes it.
pub(crate) async fn drive_upload(
    queue: Arc<UploadQueue>,
    executor: Arc<dyn TransferExecutor>,
    retry: RetryPolicy,
    id: UploadId,
    file: FileHandle,
    cancel: CancellationToken,
) -> UploadStatus {
    let mut backoff = retry.backoff();

    loop {
        let attempt = match queue.start_attempt(id) {
            Some(attempt) => attempt,
            // removed or already finished elsewhere (e.g. cancelled by the user)
            None => return queue.get(id).map_or(UploadStatus::Cancelled, |r| r.status),
        };
        tracing::debug!("⬆️ Upload {} ({}) attempt {}/{}", id, file.name(), attempt, retry.max_attempts);

        let events = executor.send(file.clone());
        let error = match run_attempt(&queue, id, events, &cancel).await {
            AttemptOutcome::Completed => {
                queue.complete(id);
                tracing::info!("✅ Upload {} ({}) completed", id, file.name());
                return UploadStatus::Completed;
            }
            AttemptOutcome::Cancelled => {
                queue.cancel(id);
                tracing::info!("🛑 Upload {} ({}) cancelled", id, file.name());
                return UploadStatus::Cancelled;
            }
            AttemptOutcome::Failed(error) => error,
        };

        let delay = if error.is_retryable() && attempt < retry.max_attempts {
            backoff.next_backoff()
        } else {
            None
        };

        let Some(delay) = delay else {
            tracing::warn!("❌ Upload {} ({}) failed after {} attempt(s): {}", id, file.name(), attempt, error);
            queue.fail(id, error.to_string());
            return UploadStatus::Error;
        };

        tracing::warn!(
            "Upload {} ({}) attempt {} failed: {}. Retrying in {:?}",
            id,
            file.name(),
            attempt,
            error,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                queue.cancel(id);
                return UploadStatus::Cancelled;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_attempt(
    queue: &UploadQueue,
    id: UploadId,
    mut events: TransferStream,
    cancel: &CancellationToken,
) -> AttemptOutcome {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return AttemptOutcome::Cancelled,
            next = events.next() => match next {
                Some(Ok(TransferEvent::Progress(percent))) => {
                    queue.advance(id, percent);
                }
                Some(Ok(TransferEvent::Processing)) => {
                    queue.mark_processing(id);
                }
                Some(Ok(TransferEvent::Completed)) => return AttemptOutcome::Completed,
                Some(Err(error)) => return AttemptOutcome::Failed(error),
                None => return AttemptOutcome::Failed(TransferError::Interrupted),
            },
        }
    }
}
