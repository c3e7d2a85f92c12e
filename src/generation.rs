// src/generation.rs
//! AI video generation panel state
//! Validates the request, runs a generator and publishes progress snapshots

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::{GenerationRequest, GenerationResult, GenerationStatus, SUPPORTED_DURATIONS};

/// Stage labels in the order the generator reports them
pub const GENERATION_STAGES: [&str; 6] = [
    "Analyzing prompt...",
    "Generating script...",
    "Creating scenes...",
    "Adding effects...",
    "Rendering video...",
    "Finalizing...",
];

pub const GENERATED_VIDEO_URL: &str = "/api/generated-video.mp4";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Please describe the video you want to generate")]
    EmptyPrompt,
    #[error("Unsupported duration: {0}s")]
    UnsupportedDuration(u32),
    #[error("A video is already being generated")]
    Busy,
    #[error("Generation failed: {0}")]
    Failed(String),
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        if !SUPPORTED_DURATIONS.contains(&self.duration) {
            return Err(GenerationError::UnsupportedDuration(self.duration));
        }
        Ok(())
    }
}

/// Progress in percent plus the current stage label
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    /// Produce a video for `request` and return its URL
    async fn generate(&self, request: &GenerationRequest, on_progress: ProgressCallback) -> Result<String, GenerationError>;
}

/// Label the panel shows for a given progress value
pub fn stage_label(progress: f64) -> &'static str {
    let index = match progress {
        p if p < 20.0 => 0,
        p if p < 40.0 => 1,
        p if p < 60.0 => 2,
        p if p < 80.0 => 3,
        p if p < 95.0 => 4,
        _ => 5,
    };
    GENERATION_STAGES[index]
}

/// Walks the stages on a fixed tick and returns a canned result URL
pub struct SimulatedVideoGenerator {
    tick: Duration,
}

impl SimulatedVideoGenerator {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

impl Default for SimulatedVideoGenerator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl VideoGenerator for SimulatedVideoGenerator {
    async fn generate(&self, request: &GenerationRequest, on_progress: ProgressCallback) -> Result<String, GenerationError> {
        tracing::debug!(
            "Simulating {} generation ({}s, {})",
            request.style.label(),
            request.duration,
            request.aspect_ratio.as_str()
        );
        let total = GENERATION_STAGES.len() as f64;
        for (i, stage) in GENERATION_STAGES.iter().enumerate() {
            tokio::time::sleep(self.tick).await;
            on_progress((i + 1) as f64 / total * 100.0, stage);
        }
        Ok(GENERATED_VIDEO_URL.to_string())
    }
}

pub struct GenerationSession {
    generator: Arc<dyn VideoGenerator>,
    state: Arc<watch::Sender<Option<GenerationResult>>>,
}

impl GenerationSession {
    pub fn new(generator: Arc<dyn VideoGenerator>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            generator,
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> Option<GenerationResult> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<GenerationResult>> {
        self.state.subscribe()
    }

    pub fn is_generating(&self) -> bool {
        matches!(
            self.state.borrow().as_ref().map(|r| r.status),
            Some(GenerationStatus::Pending | GenerationStatus::Generating)
        )
    }

    /// Run one generation to completion and return the final result
    pub async fn start(&self, request: GenerationRequest) -> Result<GenerationResult, GenerationError> {
        request.validate()?;

        let id = Uuid::new_v4().to_string();
        let pending = GenerationResult {
            id: id.clone(),
            request: request.clone(),
            status: GenerationStatus::Pending,
            progress: 0.0,
            result_url: None,
            error: None,
            created_at: Utc::now(),
        };
        let claimed = self.state.send_if_modified(|current| {
            let busy = matches!(
                current.as_ref().map(|r| r.status),
                Some(GenerationStatus::Pending | GenerationStatus::Generating)
            );
            if busy {
                return false;
            }
            *current = Some(pending);
            true
        });
        if !claimed {
            return Err(GenerationError::Busy);
        }
        tracing::info!("🎬 Generation {} started: {:?}", id, request.prompt);

        let state = self.state.clone();
        let run_id = id.clone();
        let on_progress: ProgressCallback = Arc::new(move |progress, stage| {
            tracing::debug!("Generation {} at {:.0}%: {}", run_id, progress, stage);
            state.send_if_modified(|current| match current {
                // a reset or a newer run replaced this one
                Some(result) if result.id == run_id => {
                    result.status = GenerationStatus::Generating;
                    result.progress = progress.clamp(result.progress, 100.0);
                    true
                }
                _ => false,
            });
        });

        self.state.send_if_modified(|current| match current {
            Some(result) if result.id == id => {
                result.status = GenerationStatus::Generating;
                true
            }
            _ => false,
        });

        let outcome = self.generator.generate(&request, on_progress).await;

        let mut finished = None;
        self.state.send_if_modified(|current| match current {
            Some(result) if result.id == id => {
                match &outcome {
                    Ok(url) => {
                        result.status = GenerationStatus::Completed;
                        result.progress = 100.0;
                        result.result_url = Some(url.clone());
                    }
                    Err(e) => {
                        result.status = GenerationStatus::Error;
                        result.error = Some(e.to_string());
                    }
                }
                finished = Some(result.clone());
                true
            }
            _ => false,
        });

        match (outcome, finished) {
            (Ok(_), Some(result)) => {
                tracing::info!("✅ Generation {} completed", id);
                Ok(result)
            }
            (Err(e), _) => {
                tracing::warn!("Generation {} failed: {}", id, e);
                Err(e)
            }
            (Ok(_), None) => Err(GenerationError::Failed("generation was reset".to_string())),
        }
    }

    /// Forget the current result
    pub fn reset(&self) {
        self.state.send_if_modified(|current| current.take().is_some());
    }
}
