// src/captions.rs
//! Caption editor state: the caption list for one video, the selection, and AI caption generation.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::{Caption, CaptionStyle, CaptionUpdate};

/// Length of a caption added by hand
pub const NEW_CAPTION_SECONDS: f64 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptionError {
    #[error("Caption not found: {0}")]
    NotFound(String),
    #[error("Caption must not end before it starts ({start:.2}s to {end:.2}s)")]
    InvalidRange { start: f64, end: f64 },
    #[error("Captions are already being generated")]
    Busy,
    #[error("Caption generation failed: {0}")]
    Generation(String),
}

/// Produces captions for a video, starting after `after` seconds
#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    async fn generate(&self, video_id: &str, after: f64) -> Result<Vec<Caption>, CaptionError>;
}

/// Stand-in for a transcription service
pub struct SimulatedCaptionGenerator {
    delay: Duration,
}

impl SimulatedCaptionGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedCaptionGenerator {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl CaptionGenerator for SimulatedCaptionGenerator {
    async fn generate(&self, video_id: &str, after: f64) -> Result<Vec<Caption>, CaptionError> {
        tokio::time::sleep(self.delay).await;

        let lines = [
            ("This feature will revolutionize your workflow", 0.5, 3.0),
            ("And here's how you can get started", 3.5, 6.0),
        ];
        Ok(lines
            .iter()
            .map(|(text, start, end)| Caption {
                id: Uuid::new_v4().to_string(),
                video_id: video_id.to_string(),
                text: text.to_string(),
                start_time: after + start,
                end_time: after + end,
                style: CaptionStyle::default(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackState {
    pub captions: Vec<Caption>,
    pub selected: Option<String>,
    pub is_generating: bool,
}

pub struct CaptionTrack {
    video_id: String,
    state: watch::Sender<TrackState>,
}

impl CaptionTrack {
    pub fn new(video_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackState::default());
        Self {
            video_id: video_id.into(),
            state,
        }
    }

    pub fn with_captions(self, captions: Vec<Caption>) -> Self {
        self.state.send_modify(|s| s.captions = captions);
        self
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn captions(&self) -> Vec<Caption> {
        self.state.borrow().captions.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.state.borrow().is_generating
    }

    pub fn selected(&self) -> Option<Caption> {
        let state = self.state.borrow();
        let id = state.selected.as_ref()?;
        state.captions.iter().find(|c| &c.id == id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackState> {
        self.state.subscribe()
    }

    /// Select `id`, or clear the selection with `None`
    pub fn select(&self, id: Option<&str>) -> bool {
        self.state.send_if_modified(|s| {
            let target = match id {
                Some(id) if s.captions.iter().any(|c| c.id == id) => Some(id.to_string()),
                Some(_) => return false,
                None => None,
            };
            if s.selected == target {
                return false;
            }
            s.selected = target;
            true
        })
    }

    /// Add a placeholder caption at the playhead and select it
    pub fn add_at(&self, current_time: f64) -> Caption {
        let start = current_time.max(0.0);
        let caption = Caption {
            id: Uuid::new_v4().to_string(),
            video_id: self.video_id.clone(),
            text: "New caption".to_string(),
            start_time: start,
            end_time: start + NEW_CAPTION_SECONDS,
            style: CaptionStyle::default(),
        };
        self.state.send_modify(|s| {
            s.captions.push(caption.clone());
            s.selected = Some(caption.id.clone());
        });
        caption
    }

    pub fn delete(&self, id: &str) -> bool {
        self.state.send_if_modified(|s| {
            let before = s.captions.len();
            s.captions.retain(|c| c.id != id);
            if s.selected.as_deref() == Some(id) {
                s.selected = None;
            }
            s.captions.len() != before
        })
    }

    pub fn update(&self, id: &str, update: CaptionUpdate) -> Result<Caption, CaptionError> {
        let mut outcome = Err(CaptionError::NotFound(id.to_string()));
        self.state.send_if_modified(|s| {
            let Some(caption) = s.captions.iter_mut().find(|c| c.id == id) else {
                return false;
            };
            let start = update.start_time.unwrap_or(caption.start_time);
            let end = update.end_time.unwrap_or(caption.end_time);
            if !start.is_finite() || !end.is_finite() || end < start {
                outcome = Err(CaptionError::InvalidRange { start, end });
                return false;
            }

            caption.start_time = start;
            caption.end_time = end;
            if let Some(text) = update.text {
                caption.text = text;
            }
            if let Some(style) = update.style {
                caption.style = style;
            }
            outcome = Ok(caption.clone());
            true
        });
        outcome
    }

    /// Captions on screen at `time`
    pub fn active_at(&self, time: f64) -> Vec<Caption> {
        self.state
            .borrow()
            .captions
            .iter()
            .filter(|c| c.covers(time))
            .cloned()
            .collect()
    }

    /// Latest end time on the track, 0 when empty
    pub fn end_time(&self) -> f64 {
        self.state
            .borrow()
            .captions
            .iter()
            .map(|c| c.end_time)
            .fold(0.0, f64::max)
    }

    /// Append generated captions after the existing ones; returns how many were added
    pub async fn generate(&self, generator: &dyn CaptionGenerator) -> Result<usize, CaptionError> {
        let started = self.state.send_if_modified(|s| {
            if s.is_generating {
                return false;
            }
            s.is_generating = true;
            true
        });
        if !started {
            return Err(CaptionError::Busy);
        }

        tracing::info!("✨ Generating captions for video {}", self.video_id);
        let result = generator.generate(&self.video_id, self.end_time()).await;

        let added = result.as_ref().map(|c| c.len()).unwrap_or(0);
        self.state.send_modify(|s| {
            if let Ok(generated) = &result {
                s.captions.extend(generated.iter().cloned());
            }
            s.is_generating = false;
        });

        match result {
            Ok(_) => Ok(added),
            Err(e) => {
                tracing::warn!("Caption generation failed for {}: {}", self.video_id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn caption(id: &str, start: f64, end: f64) -> Caption {
        Caption {
            id: id.to_string(),
            video_id: "v1".to_string(),
            text: format!("line {}", id),
            start_time: start,
            end_time: end,
            style: CaptionStyle::default(),
        }
    }

    fn demo_track() -> CaptionTrack {
        CaptionTrack::new("v1").with_captions(vec![caption("1", 0.0, 3.0), caption("2", 3.5, 6.0)])
    }

    struct Failing;

    #[async_trait]
    impl CaptionGenerator for Failing {
        async fn generate(&self, _video_id: &str, _after: f64) -> Result<Vec<Caption>, CaptionError> {
            Err(CaptionError::Generation("transcriber offline".into()))
        }
    }

    #[test]
    fn test_add_at_playhead_selects_new_caption() {
        let track = demo_track();
        let added = track.add_at(4.25);

        assert_eq!(added.text, "New caption");
        assert_eq!(added.start_time, 4.25);
        assert_eq!(added.end_time, 6.25);
        assert_eq!(added.style, CaptionStyle::default());
        assert_eq!(track.selected().map(|c| c.id), Some(added.id));
        assert_eq!(track.captions().len(), 3);
    }

    #[test]
    fn test_active_at_uses_inclusive_bounds() {
        let track = demo_track();
        assert_eq!(track.active_at(3.0).len(), 1);
        assert!(track.active_at(3.2).is_empty());
        assert_eq!(track.active_at(3.5)[0].id, "2");
    }

    #[test]
    fn test_update_rejects_inverted_range() {
        let track = demo_track();
        let error = track
            .update(
                "1",
                CaptionUpdate {
                    end_time: Some(-1.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(error, CaptionError::InvalidRange { start: 0.0, end: -1.0 });
        assert_eq!(track.captions()[0].end_time, 3.0);

        let updated = track
            .update(
                "1",
                CaptionUpdate {
                    text: Some("Hello".into()),
                    end_time: Some(2.5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.text, "Hello");
        assert_eq!(updated.end_time, 2.5);

        assert!(matches!(track.update("nope", CaptionUpdate::default()), Err(CaptionError::NotFound(_))));
    }

    #[test]
    fn test_delete_clears_selection() {
        let track = demo_track();
        assert!(track.select(Some("2")));
        assert!(track.delete("2"));
        assert!(track.selected().is_none());
        assert!(!track.delete("2"));
        assert!(!track.select(Some("2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_appends_after_track_end() {
        let track = Arc::new(demo_track());
        let generator = Arc::new(SimulatedCaptionGenerator::default());

        let task = {
            let track = track.clone();
            let generator = generator.clone();
            tokio::spawn(async move { track.generate(generator.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(track.is_generating());
        assert_eq!(track.generate(generator.as_ref()).await, Err(CaptionError::Busy));

        assert_eq!(task.await.unwrap(), Ok(2));
        assert!(!track.is_generating());

        let captions = track.captions();
        assert_eq!(captions.len(), 4);
        assert_eq!(captions[2].start_time, 6.5);
        assert_eq!(captions[2].end_time, 9.0);
        assert_eq!(captions[3].start_time, 9.5);
        assert_eq!(captions[3].end_time, 12.0);
    }

    #[tokio::test]
    async fn test_generate_failure_keeps_captions() {
        let track = demo_track();
        let error = track.generate(&Failing).await.unwrap_err();
        assert_eq!(error, CaptionError::Generation("transcriber offline".into()));
        assert_eq!(track.captions().len(), 2);
        assert!(!track.is_generating());
    }
}
