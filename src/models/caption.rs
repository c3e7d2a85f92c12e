use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionPosition {
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionAlignment {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionStyle {
    pub font_family: String,
    pub font_size: u32,
    pub color: String,
    pub background_color: Option<String>,
    pub position: CaptionPosition,
    pub alignment: CaptionAlignment,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_family: "Arial".to_string(),
            font_size: 24,
            color: "#ffffff".to_string(),
            background_color: Some("#000000".to_string()),
            position: CaptionPosition::Bottom,
            alignment: CaptionAlignment::Center,
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

/// A timed line of text over a video, times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub id: String,
    pub video_id: String,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub style: CaptionStyle,
}

impl Caption {
    pub fn covers(&self, time: f64) -> bool {
        time >= self.start_time && time <= self.end_time
    }
}

/// Partial edit applied by `CaptionTrack::update`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptionUpdate {
    pub text: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub style: Option<CaptionStyle>,
}
