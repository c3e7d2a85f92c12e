use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durations (seconds) the generator panel offers
pub const SUPPORTED_DURATIONS: [u32; 5] = [15, 30, 60, 120, 300];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStyle {
    Documentary,
    Commercial,
    Social,
    Educational,
}

impl VideoStyle {
    pub fn label(self) -> &'static str {
        match self {
            VideoStyle::Documentary => "Documentary",
            VideoStyle::Commercial => "Commercial",
            VideoStyle::Social => "Social Media",
            VideoStyle::Educational => "Educational",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Standard,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Standard => "4:3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub style: VideoStyle,
    /// Target length in seconds
    pub duration: u32,
    pub aspect_ratio: AspectRatio,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            style: VideoStyle::Commercial,
            duration: 30,
            aspect_ratio: AspectRatio::Landscape,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub id: String,
    pub request: GenerationRequest,
    pub status: GenerationStatus,
    pub progress: f64,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
