use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file::FileHandle;

/// Unique identifier of one record in the upload queue
pub type UploadId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Bytes are moving; progress may still change
    Uploading,
    /// All bytes sent, waiting for the remote side to accept them
    Processing,
    Completed,
    Error,
    /// Stopped by the user
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Error | UploadStatus::Cancelled)
    }
}

/// One file's passage through the upload queue
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: UploadId,
    pub file: FileHandle,
    pub progress: u8,
    pub status: UploadStatus,
    /// JPEG data URI, set once thumbnail extraction succeeds
    pub thumbnail: Option<String>,
    /// Failure reason, only while status is `Error`
    pub error: Option<String>,
    pub attempts: u32,
    pub added_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadRecord {
    pub fn new(file: FileHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            progress: 0,
            status: UploadStatus::Uploading,
            thumbnail: None,
            error: None,
            attempts: 0,
            added_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_starts_uploading() {
        let record = UploadRecord::new(FileHandle::from_bytes("a.mp4", "video/mp4", vec![]));
        assert_eq!(record.status, UploadStatus::Uploading);
        assert_eq!(record.progress, 0);
        assert!(record.thumbnail.is_none());
        assert!(record.error.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Error.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
        assert!(!UploadStatus::Processing.is_terminal());
        assert_eq!(serde_json::to_string(&UploadStatus::Processing).unwrap(), "\"processing\"");
    }
}
