// src/uploads/queue.rs
//! Upload queue store: the ordered collection of upload records for one session.
//!
//! Every mutation builds a new `Vec` and swaps it in as a whole, so a subscriber never
//! sees a partially-applied change. Mutations that change nothing publish nothing.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::{FileHandle, UploadId, UploadRecord, UploadStatus};

/// Immutable view of the queue at one point in time
pub type QueueSnapshot = Arc<Vec<UploadRecord>>;

pub struct UploadQueue {
    state: watch::Sender<QueueSnapshot>,
}

impl UploadQueue {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(Vec::new()));
        Self { state }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that is notified after every effective mutation
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.state.subscribe()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    pub fn get(&self, id: UploadId) -> Option<UploadRecord> {
        self.state.borrow().iter().find(|r| r.id == id).cloned()
    }

    /// Copy-on-write commit. `f` returns whether it changed anything.
    fn commit<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<UploadRecord>) -> bool,
    {
        self.state.send_if_modified(|current| {
            let mut next = current.as_ref().clone();
            if f(&mut next) {
                *current = Arc::new(next);
                true
            } else {
                false
            }
        })
    }

    /// Apply `f` to the record with `id`. Missing records are left alone.
    pub fn update<F>(&self, id: UploadId, f: F) -> bool
    where
        F: FnOnce(&mut UploadRecord) -> bool,
    {
        self.commit(|records| match records.iter_mut().find(|r| r.id == id) {
            Some(record) => f(record),
            None => false,
        })
    }

    /// Append records in the given order
    pub fn append(&self, new_records: Vec<UploadRecord>) -> bool {
        if new_records.is_empty() {
            return false;
        }
        self.commit(move |records| {
            records.extend(new_records);
            true
        })
    }

    /// Remove every record that belongs to `file`
    pub fn remove(&self, file: &FileHandle) -> Vec<UploadRecord> {
        self.remove_where(|r| r.file == *file)
    }

    pub fn clear_completed(&self) -> Vec<UploadRecord> {
        self.remove_where(|r| r.status == UploadStatus::Completed)
    }

    pub fn clear_all(&self) -> Vec<UploadRecord> {
        self.remove_where(|_| true)
    }

    fn remove_where<P>(&self, predicate: P) -> Vec<UploadRecord>
    where
        P: Fn(&UploadRecord) -> bool,
    {
        let mut removed = Vec::new();
        self.commit(|records| {
            records.retain(|record| {
                if predicate(record) {
                    removed.push(record.clone());
                    false
                } else {
                    true
                }
            });
            !removed.is_empty()
        });
        removed
    }

    /// Swap a finished (error/cancelled) record for a fresh one in the same position
    pub fn replace(&self, id: UploadId, fresh: UploadRecord) -> bool {
        self.commit(move |records| match records.iter_mut().find(|r| r.id == id) {
            Some(record) if matches!(record.status, UploadStatus::Error | UploadStatus::Cancelled) => {
                *record = fresh;
                true
            }
            _ => false,
        })
    }

    /// Begin a transfer attempt; returns the attempt number, or None if the record is gone or finished
    pub fn start_attempt(&self, id: UploadId) -> Option<u32> {
        let mut attempt = None;
        self.update(id, |record| {
            if record.is_terminal() {
                return false;
            }
            record.attempts += 1;
            record.status = UploadStatus::Uploading;
            attempt = Some(record.attempts);
            true
        });
        attempt
    }

    /// Raise progress while uploading. Never lowers it.
    pub fn advance(&self, id: UploadId, percent: u8) -> bool {
        let percent = percent.min(100);
        self.update(id, |record| {
            if record.status != UploadStatus::Uploading || percent <= record.progress {
                return false;
            }
            record.progress = percent;
            true
        })
    }

    pub fn mark_processing(&self, id: UploadId) -> bool {
        self.update(id, |record| {
            if record.status != UploadStatus::Uploading {
                return false;
            }
            record.status = UploadStatus::Processing;
            record.progress = 100;
            true
        })
    }

    pub fn complete(&self, id: UploadId) -> bool {
        self.finish(id, UploadStatus::Completed, None)
    }

    pub fn fail(&self, id: UploadId, reason: impl Into<String>) -> bool {
        self.finish(id, UploadStatus::Error, Some(reason.into()))
    }

    pub fn cancel(&self, id: UploadId) -> bool {
        self.finish(id, UploadStatus::Cancelled, None)
    }

    fn finish(&self, id: UploadId, status: UploadStatus, error: Option<String>) -> bool {
        self.update(id, |record| {
            if record.is_terminal() {
                return false;
            }
            if status == UploadStatus::Completed {
                record.progress = 100;
            }
            record.status = status;
            record.error = error;
            record.finished_at = Some(Utc::now());
            true
        })
    }

    /// Attach a preview. Only the first successful extraction is kept.
    pub fn set_thumbnail(&self, id: UploadId, data_uri: String) -> bool {
        self.update(id, |record| {
            if record.thumbnail.is_some() {
                return false;
            }
            record.thumbnail = Some(data_uri);
            true
        })
    }
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> UploadRecord {
        UploadRecord::new(FileHandle::from_bytes(name, "video/mp4", vec![0u8; 8]))
    }

    #[test]
    fn test_append_preserves_order() {
        let queue = UploadQueue::new();
        let records = vec![record("a.mp4"), record("b.mp4"), record("c.mp4")];
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();

        assert!(queue.append(records));
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_empty_append_publishes_nothing() {
        let queue = UploadQueue::new();
        let rx = queue.subscribe();

        assert!(!queue.append(Vec::new()));
        assert!(!rx.has_changed().unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_unknown_handle_is_noop() {
        let queue = UploadQueue::new();
        queue.append(vec![record("a.mp4")]);
        let before = queue.snapshot();
        let mut rx = queue.subscribe();
        rx.borrow_and_update();

        let stranger = FileHandle::from_bytes("a.mp4", "video/mp4", vec![0u8; 8]);
        assert!(queue.remove(&stranger).is_empty());
        assert!(queue.remove(&stranger).is_empty());
        assert!(!rx.has_changed().unwrap());
        assert!(Arc::ptr_eq(&before, &queue.snapshot()));
    }

    #[test]
    fn test_remove_targets_all_records_of_a_handle() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        let a_again = UploadRecord::new(a.file.clone());
        let b = record("b.mp4");
        queue.append(vec![a.clone(), b.clone(), a_again]);

        let removed = queue.remove(&a.file);
        assert_eq!(removed.len(), 2);
        assert_eq!(queue.snapshot().len(), 1);
        assert_eq!(queue.snapshot()[0].id, b.id);
    }

    #[test]
    fn test_clear_completed_keeps_everything_else_untouched() {
        let queue = UploadQueue::new();
        let (a, b, c, d) = (record("a.mp4"), record("b.mp4"), record("c.mp4"), record("d.mp4"));
        queue.append(vec![a.clone(), b.clone(), c.clone(), d.clone()]);

        queue.complete(a.id);
        queue.advance(b.id, 40);
        queue.fail(b.id, "boom");
        queue.advance(c.id, 70);
        queue.complete(d.id);

        let survivors_before: Vec<_> = queue
            .snapshot()
            .iter()
            .filter(|r| r.status != UploadStatus::Completed)
            .cloned()
            .collect();

        let removed = queue.clear_completed();
        assert_eq!(removed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, d.id]);

        let after = queue.snapshot();
        assert_eq!(after.len(), 2);
        for (left, right) in after.iter().zip(survivors_before.iter()) {
            assert_eq!(left.id, right.id);
            assert_eq!(left.status, right.status);
            assert_eq!(left.progress, right.progress);
            assert_eq!(left.error, right.error);
        }
    }

    #[test]
    fn test_advance_is_monotonic_and_bounded() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        queue.append(vec![a.clone()]);

        assert!(queue.advance(a.id, 30));
        assert!(!queue.advance(a.id, 20));
        assert!(!queue.advance(a.id, 30));
        assert!(queue.advance(a.id, 250));
        assert_eq!(queue.get(a.id).unwrap().progress, 100);
    }

    #[test]
    fn test_terminal_records_are_frozen() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        queue.append(vec![a.clone()]);
        queue.advance(a.id, 40);
        assert!(queue.fail(a.id, "network down"));

        assert!(!queue.advance(a.id, 50));
        assert!(!queue.complete(a.id));
        assert!(!queue.cancel(a.id));
        assert!(!queue.mark_processing(a.id));
        assert_eq!(queue.start_attempt(a.id), None);

        let frozen = queue.get(a.id).unwrap();
        assert_eq!(frozen.status, UploadStatus::Error);
        assert_eq!(frozen.progress, 40);
        assert_eq!(frozen.error.as_deref(), Some("network down"));
        assert!(frozen.finished_at.is_some());
    }

    #[test]
    fn test_processing_then_complete() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        queue.append(vec![a.clone()]);

        assert_eq!(queue.start_attempt(a.id), Some(1));
        assert!(queue.mark_processing(a.id));
        let processing = queue.get(a.id).unwrap();
        assert_eq!(processing.status, UploadStatus::Processing);
        assert_eq!(processing.progress, 100);

        assert!(queue.complete(a.id));
        assert_eq!(queue.get(a.id).unwrap().status, UploadStatus::Completed);
    }

    #[test]
    fn test_replace_only_finished_failures() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        queue.append(vec![a.clone()]);

        let fresh = UploadRecord::new(a.file.clone());
        assert!(!queue.replace(a.id, fresh.clone()));

        queue.cancel(a.id);
        assert!(queue.replace(a.id, fresh.clone()));
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, fresh.id);
        assert_eq!(snapshot[0].status, UploadStatus::Uploading);
    }

    #[test]
    fn test_thumbnail_attaches_once() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        queue.append(vec![a.clone()]);
        queue.complete(a.id);

        assert!(queue.set_thumbnail(a.id, "data:image/jpeg;base64,AAA".into()));
        assert!(!queue.set_thumbnail(a.id, "data:image/jpeg;base64,BBB".into()));
        assert_eq!(queue.get(a.id).unwrap().thumbnail.as_deref(), Some("data:image/jpeg;base64,AAA"));
    }

    #[test]
    fn test_old_snapshots_are_never_mutated() {
        let queue = UploadQueue::new();
        let a = record("a.mp4");
        queue.append(vec![a.clone()]);
        let before = queue.snapshot();

        queue.advance(a.id, 50);
        assert_eq!(before[0].progress, 0);
        assert_eq!(queue.snapshot()[0].progress, 50);
    }
}
