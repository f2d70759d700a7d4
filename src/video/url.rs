use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Length of a YouTube video identifier
pub const VIDEO_ID_LEN: usize = 11;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?(?:youtube|youtu|youtube-nocookie)\.(?:com|be)/(?:watch\?(?:.*&)?v=|embed/|v/|shorts/|live/)?([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    )
    .expect("video URL pattern is valid")
});

/// A user-supplied video URL and the identifier parsed from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoReference {
    raw_url: String,
    video_id: Option<String>,
}

impl VideoReference {
    pub fn parse(raw_url: &str) -> Self {
        Self {
            raw_url: raw_url.to_string(),
            video_id: extract_video_id(raw_url),
        }
    }

    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }

    /// Clean watch URL, free of tracking and playlist parameters
    pub fn canonical_url(&self) -> Option<String> {
        self.video_id.as_ref().map(|id| format!("{}{}", WATCH_URL, id))
    }
}

/// Extract the 11-character video id from any known YouTube URL spelling
pub fn extract_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    if url.len() < VIDEO_ID_LEN {
        return None;
    }

    YOUTUBE_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
