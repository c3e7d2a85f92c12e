use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::utils::detect_mime_type;

/// Identity of a selected file. Clones of a handle share it.
pub type FileId = Uuid;

/// Where the bytes of a handle live
enum FileSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

#[derive(Serialize)]
struct FileInner {
    id: FileId,
    name: String,
    size: u64,
    mime_type: String,
    #[serde(skip)]
    source: FileSource,
}

/// Opaque handle to a user-selected payload.
///
/// Equality is identity: two handles are equal only if one was cloned from the other.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<FileInner>,
}

impl FileHandle {
    /// Handle backed by a file on disk. Size comes from metadata, MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let mime_type = detect_mime_type(&name);

        Ok(Self::build(name, mime_type, metadata.len(), FileSource::Path(path.to_path_buf())))
    }

    /// Handle backed by an in-memory buffer (drag-and-drop payloads, tests)
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::build(name.into(), mime_type.into(), size, FileSource::Memory(data.into()))
    }

    fn build(name: String, mime_type: String, size: u64, source: FileSource) -> Self {
        Self {
            inner: Arc::new(FileInner {
                id: Uuid::new_v4(),
                name,
                size,
                mime_type,
                source,
            }),
        }
    }

    pub fn id(&self) -> FileId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    /// Filesystem path, when the handle is disk-backed
    pub fn path(&self) -> Option<&Path> {
        match &self.inner.source {
            FileSource::Path(path) => Some(path.as_path()),
            FileSource::Memory(_) => None,
        }
    }

    /// Raw bytes, when the handle is memory-backed
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.inner.source {
            FileSource::Path(_) => None,
            FileSource::Memory(data) => Some(&data[..]),
        }
    }

    /// Open a fresh reader over the payload
    pub async fn open(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        match &self.inner.source {
            FileSource::Path(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
            FileSource::Memory(data) => Ok(Box::new(io::Cursor::new(data.clone()))),
        }
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for FileHandle {}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("mime_type", &self.inner.mime_type)
            .finish()
    }
}

impl Serialize for FileHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}
