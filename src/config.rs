// src/config.rs
//! Environment-driven settings for the upload queue, thumbnails and the identity adapter.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("{key} must be between {min} and {max}")]
    OutOfRange { key: String, min: u64, max: u64 },
}

/// Retry settings for a failed transfer
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff schedule for one record. No wall-clock cap; the attempt count bounds it.
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Multipart upload target. Unset means the simulated transfer is used.
    pub upload_endpoint: Option<String>,
    pub upload_step_percent: u8,
    pub upload_tick: Duration,
    pub retry: RetryPolicy,
    pub thumbnail_max_width: u32,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub firebase_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_endpoint: None,
            upload_step_percent: 10,
            upload_tick: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            thumbnail_max_width: 320,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            firebase_api_key: None,
        }
    }
}

impl AppConfig {
    /// Read settings from the process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let upload_step_percent: u8 = parse_or(&lookup, "UPLOAD_STEP_PERCENT", defaults.upload_step_percent)?;
        if !(1..=100).contains(&upload_step_percent) {
            return Err(ConfigError::OutOfRange {
                key: "UPLOAD_STEP_PERCENT".to_string(),
                min: 1,
                max: 100,
            });
        }

        let max_attempts: u32 = parse_or(&lookup, "UPLOAD_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                key: "UPLOAD_MAX_ATTEMPTS".to_string(),
                min: 1,
                max: u32::MAX as u64,
            });
        }

        let tick_ms: u64 = parse_or(&lookup, "UPLOAD_TICK_MS", defaults.upload_tick.as_millis() as u64)?;
        let initial_ms: u64 = parse_or(
            &lookup,
            "UPLOAD_RETRY_INITIAL_MS",
            defaults.retry.initial_interval.as_millis() as u64,
        )?;
        let max_ms: u64 = parse_or(
            &lookup,
            "UPLOAD_RETRY_MAX_MS",
            defaults.retry.max_interval.as_millis() as u64,
        )?;

        Ok(Self {
            upload_endpoint: non_empty("UPLOAD_ENDPOINT"),
            upload_step_percent,
            upload_tick: Duration::from_millis(tick_ms),
            retry: RetryPolicy {
                max_attempts,
                initial_interval: Duration::from_millis(initial_ms),
                max_interval: Duration::from_millis(max_ms.max(initial_ms)),
                multiplier: defaults.retry.multiplier,
            },
            thumbnail_max_width: parse_or(&lookup, "THUMBNAIL_MAX_WIDTH", defaults.thumbnail_max_width)?,
            ffmpeg_path: non_empty("FFMPEG_PATH").map(PathBuf::from).unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: non_empty("FFPROBE_PATH").map(PathBuf::from).unwrap_or(defaults.ffprobe_path),
            firebase_api_key: non_empty("FIREBASE_API_KEY"),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        _ => Ok(default),
    }
}
