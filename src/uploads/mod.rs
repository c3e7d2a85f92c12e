// src/uploads/mod.rs
//! Upload queue manager
//! Owns the queue store, spawns one driver per record and attaches thumbnails as they arrive

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod driver;
pub mod queue;
pub mod transfer;

pub use queue::{QueueSnapshot, UploadQueue};
pub use transfer::{HttpTransfer, SimulatedTransfer, TransferError, TransferEvent, TransferExecutor, TransferStream};

use crate::config::{AppConfig, RetryPolicy};
use crate::models::{FileHandle, UploadId, UploadRecord, UploadStatus};
use crate::thumbnail::ThumbnailExtractor;
use crate::utils::is_video_mime;

/// Control handle for one in-flight record
struct UploadTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Upload manager handles the upload queue for one session
pub struct UploadManager {
    queue: Arc<UploadQueue>,
    executor: Arc<dyn TransferExecutor>,
    thumbnails: Option<Arc<ThumbnailExtractor>>,
    retry: RetryPolicy,
    /// Running drivers indexed by upload id
    tasks: Arc<Mutex<HashMap<UploadId, UploadTask>>>,
    /// Pending thumbnail extractions
    previews: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl UploadManager {
    pub fn new(executor: Arc<dyn TransferExecutor>) -> Self {
        Self {
            queue: Arc::new(UploadQueue::new()),
            executor,
            thumbnails: None,
            retry: RetryPolicy::default(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            previews: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the manager the binary uses: HTTP when an endpoint is configured, simulated otherwise
    pub fn from_config(config: &AppConfig) -> Self {
        let executor: Arc<dyn TransferExecutor> = match &config.upload_endpoint {
            Some(endpoint) => Arc::new(HttpTransfer::new(endpoint.clone())),
            None => Arc::new(SimulatedTransfer::from_config(config)),
        };
        Self::new(executor)
            .with_thumbnails(ThumbnailExtractor::from_config(config))
            .with_retry_policy(config.retry.clone())
    }

    pub fn with_thumbnails(mut self, extractor: ThumbnailExtractor) -> Self {
        self.thumbnails = Some(Arc::new(extractor));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Add one record per file, in order, and start uploading each of them.
    ///
    /// The same handle may be enqueued more than once; each call gets its own record.
    pub async fn enqueue(&self, files: Vec<FileHandle>) -> Vec<UploadId> {
        if files.is_empty() {
            return Vec::new();
        }

        let records: Vec<UploadRecord> = files.into_iter().map(UploadRecord::new).collect();
        let ids = records.iter().map(|r| r.id).collect();

        // held across append + spawn so a concurrent remove sees every task
        let mut tasks = self.tasks.lock().await;
        self.queue.append(records.clone());
        tracing::info!("📥 Enqueued {} file(s), queue length {}", records.len(), self.queue.len());

        for record in records {
            self.spawn_preview(&record).await;
            self.spawn_driver(&mut tasks, record.id, record.file);
        }

        ids
    }

    /// Remove every record of `file`, stopping any transfer still running for it
    pub async fn remove(&self, file: &FileHandle) -> usize {
        let mut tasks = self.tasks.lock().await;
        let removed = self.queue.remove(file);
        stop_tasks(&mut tasks, &removed);
        if !removed.is_empty() {
            tracing::info!("🗑️ Removed {} record(s) for {}", removed.len(), file.name());
        }
        removed.len()
    }

    pub async fn clear_completed(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let removed = self.queue.clear_completed();
        stop_tasks(&mut tasks, &removed);
        if !removed.is_empty() {
            tracing::info!("🧹 Cleared {} completed upload(s)", removed.len());
        }
        removed.len()
    }

    pub async fn clear_all(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let removed = self.queue.clear_all();
        stop_tasks(&mut tasks, &removed);
        removed.len()
    }

    /// Stop every in-flight record of `file`. Their progress stays where it was.
    pub async fn cancel(&self, file: &FileHandle) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut cancelled = 0;
        for record in self.queue.snapshot().iter().filter(|r| r.file == *file) {
            if !self.queue.cancel(record.id) {
                continue;
            }
            if let Some(task) = tasks.remove(&record.id) {
                task.cancel.cancel();
            }
            cancelled += 1;
        }
        if cancelled > 0 {
            tracing::info!("🛑 Cancelled {} upload(s) of {}", cancelled, file.name());
        }
        cancelled
    }

    /// Restart every failed or cancelled record of `file` in place.
    ///
    /// Each record is replaced by a fresh one with a new id, in the same position.
    /// Returns the new ids.
    pub async fn retry(&self, file: &FileHandle) -> Vec<UploadId> {
        let mut tasks = self.tasks.lock().await;
        let mut restarted = Vec::new();

        for previous in self.queue.snapshot().iter().filter(|r| r.file == *file) {
            if !matches!(previous.status, UploadStatus::Error | UploadStatus::Cancelled) {
                continue;
            }

            let mut fresh = UploadRecord::new(previous.file.clone());
            fresh.thumbnail = previous.thumbnail.clone();
            if !self.queue.replace(previous.id, fresh.clone()) {
                continue;
            }
            tracing::info!("🔁 Retrying {} as {}", file.name(), fresh.id);

            if fresh.thumbnail.is_none() {
                self.spawn_preview(&fresh).await;
            }
            restarted.push(fresh.id);
            self.spawn_driver(&mut tasks, fresh.id, fresh.file);
        }

        restarted
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.queue.subscribe()
    }

    /// True when no record is still uploading or processing
    pub fn is_settled(&self) -> bool {
        self.queue.snapshot().iter().all(|r| r.is_terminal())
    }

    /// Wait until every record has reached a terminal status
    pub async fn wait_until_settled(&self) -> QueueSnapshot {
        let mut rx = self.queue.subscribe();
        let settled = rx
            .wait_for(|records| records.iter().all(|r| r.is_terminal()))
            .await
            .map(|records| records.clone());
        settled.unwrap_or_else(|_| self.queue.snapshot())
    }

    /// Wait for outstanding thumbnail extractions to finish
    pub async fn flush_thumbnails(&self) {
        let pending: Vec<JoinHandle<()>> = self.previews.lock().await.drain(..).collect();
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!("Thumbnail task ended abnormally: {}", e);
            }
        }
    }

    /// Stop every driver and pending extraction and wait for the drivers to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<UploadTask> = self.tasks.lock().await.drain().map(|(_, task)| task).collect();
        for task in drained {
            let _ = task.handle.await;
        }
        self.flush_thumbnails().await;
        tracing::info!("Upload manager shut down");
    }

    fn spawn_driver(&self, tasks: &mut HashMap<UploadId, UploadTask>, id: UploadId, file: FileHandle) {
        let cancel = self.shutdown.child_token();
        let queue = self.queue.clone();
        let executor = self.executor.clone();
        let retry = self.retry.clone();
        let registry = self.tasks.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let status = driver::drive_upload(queue, executor, retry, id, file, token).await;
            tracing::debug!("Driver for {} exited with {:?}", id, status);
            registry.lock().await.remove(&id);
        });

        tasks.insert(id, UploadTask { cancel, handle });
    }

    async fn spawn_preview(&self, record: &UploadRecord) {
        let Some(extractor) = self.thumbnails.clone() else {
            return;
        };
        if !is_video_mime(record.file.mime_type()) {
            return;
        }

        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let file = record.file.clone();
        let id = record.id;

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = extractor.extract(&file) => match result {
                    Ok(data_uri) => {
                        queue.set_thumbnail(id, data_uri);
                        tracing::debug!("🖼️ Thumbnail ready for {}", file.name());
                    }
                    Err(e) => tracing::warn!("Thumbnail extraction failed for {}: {}", file.name(), e),
                },
            }
        });
        let mut previews = self.previews.lock().await;
        previews.retain(|h| !h.is_finished());
        previews.push(handle);
    }
}

fn stop_tasks(tasks: &mut HashMap<UploadId, UploadTask>, removed: &[UploadRecord]) {
    for record in removed {
        if let Some(task) = tasks.remove(&record.id) {
            task.cancel.cancel();
        }
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
