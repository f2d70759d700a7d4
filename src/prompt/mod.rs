//! Blog-writing prompt rendering.
//!
//! The template is compiled into the binary and is not configurable at
//! runtime. Only the transcript budget comes from configuration.

use serde::{Deserialize, Serialize};

/// Default transcript budget in characters
pub const DEFAULT_MAX_TRANSCRIPT_CHARS: usize = 25_000;

/// Appended to a transcript that was cut to fit the budget
pub const TRUNCATION_MARKER: &str = "...";

const BLOG_TEMPLATE: &str = include_str!("blog_template.txt");
const TRANSCRIPT_PLACEHOLDER: &str = "{transcript}";

/// Rendered prompt ready for the language model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt_text: String,

    /// Whether the transcript was cut to fit the budget
    pub truncated: bool,

    /// Character count of the original transcript
    pub transcript_chars: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    max_transcript_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_transcript_chars: usize) -> Self {
        Self {
            max_transcript_chars,
        }
    }

    pub fn max_transcript_chars(&self) -> usize {
        self.max_transcript_chars
    }

    pub fn build(&self, transcript: &str) -> GenerationRequest {
        let transcript_chars = transcript.chars().count();
        let (body, truncated) = truncate_transcript(transcript, self.max_transcript_chars);

        if truncated {
            tracing::warn!(
                transcript_chars,
                budget = self.max_transcript_chars,
                "Transcript is too long, truncating"
            );
        }

        GenerationRequest {
            prompt_text: BLOG_TEMPLATE.trim_end().replace(TRANSCRIPT_PLACEHOLDER, &body),
            truncated,
            transcript_chars,
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSCRIPT_CHARS)
    }
}

/// Render the prompt with the default transcript budget
pub fn build_prompt(transcript: &str) -> GenerationRequest {
    PromptBuilder::default().build(transcript)
}

/// Cut `text` to `max_chars` characters, appending the marker when cut
pub fn truncate_transcript(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}{}", &text[..cut], TRUNCATION_MARKER), true),
        None => (text.to_string(), false),
    }
}

/// Characters the template adds around the transcript
pub fn template_overhead() -> usize {
    BLOG_TEMPLATE.trim_end().chars().count() - TRANSCRIPT_PLACEHOLDER.chars().count()
}
