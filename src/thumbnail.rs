//! Thumbnail Extraction Module
//!
//! Produces a still preview for a queued video: probe the duration, seek to
//! `min(10% of duration, 5s)`, capture one frame and return it as a JPEG data URI.
//! Frame capture goes through [`FrameGrabber`]; the default grabber runs FFmpeg.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use serde_json::Value;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::models::FileHandle;
use crate::utils::is_video_mime;

/// Default preview width; height follows the source aspect ratio
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_JPEG_QUALITY: u8 = 80;
const SEEK_FRACTION: f64 = 0.1;
const MAX_SEEK_SECONDS: f64 = 5.0;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported media type: {0}")]
    Unsupported(String),
    #[error("Could not stage media: {0}")]
    Staging(#[from] io::Error),
    #[error("Could not load video metadata: {0}")]
    Metadata(String),
    #[error("Could not capture frame at {at:.2}s: {reason}")]
    Frame { at: f64, reason: String },
    #[error("Could not decode captured frame: {0}")]
    Image(#[from] image::ImageError),
    #[error("Could not encode thumbnail: {0}")]
    Encode(String),
}

/// Seek position for the preview frame
pub fn seek_offset(duration_seconds: f64) -> f64 {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return 0.0;
    }
    (duration_seconds * SEEK_FRACTION).min(MAX_SEEK_SECONDS)
}

/// Input argument for ffmpeg/ffprobe; the `file:` protocol keeps a leading `-` from parsing as an option
fn media_input(path: &Path) -> OsString {
    let mut input = OsString::from("file:");
    input.push(path.as_os_str());
    input
}

/// Media decoding capability used by the extractor
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    /// Duration of the media in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64, DecodeError>;

    /// One frame at `at_seconds`, encoded in any format the `image` crate reads
    async fn grab_frame(&self, path: &Path, at_seconds: f64) -> Result<Vec<u8>, DecodeError>;
}

/// FrameGrabber backed by the `ffprobe`/`ffmpeg` executables
pub struct FfmpegFrameGrabber {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegFrameGrabber {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

impl Default for FfmpegFrameGrabber {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl FrameGrabber for FfmpegFrameGrabber {
    async fn probe_duration(&self, path: &Path) -> Result<f64, DecodeError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(media_input(path))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DecodeError::Metadata(format!("Failed to execute FFprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::Metadata(format!("FFprobe error: {}", stderr.trim())));
        }

        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DecodeError::Metadata(format!("Failed to parse ffprobe output: {}", e)))?;

        json["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| DecodeError::Metadata("ffprobe reported no duration".to_string()))
    }

    async fn grab_frame(&self, path: &Path, at_seconds: f64) -> Result<Vec<u8>, DecodeError> {
        let seek = format!("{:.3}", at_seconds);
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-ss", seek.as_str(), "-i"])
            .arg(media_input(path))
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DecodeError::Frame {
                at: at_seconds,
                reason: format!("Failed to execute FFmpeg: {}", e),
            })?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DecodeError::Frame {
                at: at_seconds,
                reason: format!("FFmpeg error: {}", stderr.trim()),
            });
        }

        Ok(output.stdout)
    }
}

/// Filesystem view of a file handle for the duration of one extraction.
///
/// Memory-backed handles are written to a temp file that is removed when this guard drops.
enum StagedMedia {
    InPlace(PathBuf),
    Temp(NamedTempFile),
}

impl StagedMedia {
    async fn stage(file: &FileHandle) -> Result<Self, DecodeError> {
        if let Some(path) = file.path() {
            return Ok(StagedMedia::InPlace(path.to_path_buf()));
        }

        let suffix = Path::new(file.name())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let handle = file.clone();

        let temp = tokio::task::spawn_blocking(move || -> io::Result<NamedTempFile> {
            let mut temp = tempfile::Builder::new()
                .prefix("thumb-")
                .suffix(&suffix)
                .tempfile()?;
            temp.write_all(handle.bytes().unwrap_or_default())?;
            temp.flush()?;
            Ok(temp)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        tracing::debug!("Staged {} at {}", file.name(), temp.path().display());
        Ok(StagedMedia::Temp(temp))
    }

    fn path(&self) -> &Path {
        match self {
            StagedMedia::InPlace(path) => path,
            StagedMedia::Temp(temp) => temp.path(),
        }
    }
}

impl Drop for StagedMedia {
    fn drop(&mut self) {
        if let StagedMedia::Temp(temp) = self {
            tracing::debug!("Releasing staged media {}", temp.path().display());
        }
    }
}

/// Thumbnail service used by the upload queue
pub struct ThumbnailExtractor {
    grabber: Arc<dyn FrameGrabber>,
    max_width: u32,
}

impl ThumbnailExtractor {
    pub fn new(grabber: Arc<dyn FrameGrabber>) -> Self {
        Self {
            grabber,
            max_width: DEFAULT_THUMBNAIL_WIDTH,
        }
    }

    /// FFmpeg-backed extractor using the configured executables
    pub fn from_config(config: &AppConfig) -> Self {
        let grabber = FfmpegFrameGrabber::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone());
        Self::new(Arc::new(grabber)).with_max_width(config.thumbnail_max_width)
    }

    /// Cap the preview width; 0 disables downscaling
    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width;
        self
    }

    /// Capture a preview frame and return it as `data:image/jpeg;base64,...`
    pub async fn extract(&self, file: &FileHandle) -> Result<String, DecodeError> {
        if !is_video_mime(file.mime_type()) {
            return Err(DecodeError::Unsupported(file.mime_type().to_string()));
        }

        let frame = {
            let staged = StagedMedia::stage(file).await?;
            let duration = self.grabber.probe_duration(staged.path()).await?;
            let at = seek_offset(duration);
            tracing::debug!("Capturing preview for {} at {:.2}s of {:.2}s", file.name(), at, duration);
            self.grabber.grab_frame(staged.path(), at).await?
        };

        let max_width = self.max_width;
        let jpeg = tokio::task::spawn_blocking(move || encode_preview(&frame, max_width))
            .await
            .map_err(|e| DecodeError::Encode(e.to_string()))??;

        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
    }
}

/// Decode a captured frame, downscale it to `max_width` and re-encode as JPEG
pub fn encode_preview(frame: &[u8], max_width: u32) -> Result<Vec<u8>, DecodeError> {
    let image = image::load_from_memory(frame)?;

    let image = if max_width > 0 && image.width() > max_width {
        let height = ((image.height() as u64 * max_width as u64) / image.width() as u64).max(1) as u32;
        image.resize_exact(max_width, height, FilterType::Triangle)
    } else {
        image
    };

    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, THUMBNAIL_JPEG_QUALITY))
        .map_err(|e| DecodeError::Encode(e.to_string()))?;
    Ok(jpeg)
}
