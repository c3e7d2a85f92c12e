// lib.rs - Client core for the video studio: uploads, auth, captions and generation
pub mod auth;
pub mod captions;
pub mod config;
pub mod generation;
pub mod models;
pub mod thumbnail;
pub mod uploads;
pub mod utils;

// Re-export commonly used types for convenience
pub use auth::{AuthError, AuthSession, IdentityProvider};
pub use config::{AppConfig, ConfigError, RetryPolicy};
pub use models::*;
pub use thumbnail::{DecodeError, ThumbnailExtractor};
pub use uploads::{QueueSnapshot, UploadManager};
