use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prompts longer than this are rejected before any request is made.
pub const MAX_PROMPT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    Editorial,
    Streetwear,
    Vintage,
}

impl Default for Style {
    fn default() -> Self {
        Style::Editorial
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Style::Editorial => "Editorial",
            Style::Streetwear => "Streetwear",
            Style::Vintage => "Vintage",
        };
        f.write_str(name)
    }
}

/// A completed generation as returned by the backend. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub id: String,
    pub image_url: String,
    pub prompt: String,
    pub style: Style,
    pub created_at: DateTime<Utc>,
}

/// Request body for the generation endpoint. Built from session state at
/// submission time, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub image_data_url: String,
    pub prompt: String,
    pub style: Style,
}

impl GenerateRequest {
    pub fn new(image_data_url: impl Into<String>, prompt: &str, style: Style) -> Self {
        Self {
            image_data_url: image_data_url.into(),
            prompt: prompt.trim().to_string(),
            style,
        }
    }
}

/// Error body shared by all non-2xx backend responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
