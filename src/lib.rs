//! ytblog - turn a YouTube video into a blog article
//!
//! This library obtains a transcript for a YouTube video (hosted speech-to-text,
//! caption lookup or local download plus speech-to-text), wraps it in a fixed
//! blog-writing prompt and asks a hosted LLM to write the article.

pub mod cli;
pub mod config;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod transcribe;
pub mod utils;
pub mod video;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use generate::{Article, ContentGenerator, RetryPolicy};
pub use pipeline::{BlogPipeline, PipelineOutcome, Stage};
pub use prompt::{build_prompt, GenerationRequest, PromptBuilder};
pub use transcribe::{Transcript, TranscriptProvider};
pub use video::VideoReference;

/// Result type used at the binary and configuration boundary
pub type Result<T> = anyhow::Result<T>;

/// Failure kinds a pipeline stage can report
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BlogError {
    #[error("Invalid YouTube URL: {0:?}")]
    InvalidUrl(String),

    #[error("No usable audio stream: {0}")]
    NoAudioStream(String),

    #[error("Audio download failed: {0}")]
    DownloadFailed(String),

    #[error("Audio upload failed: {0}")]
    UploadFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Generation rejected: {0}")]
    GenerationRejected(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("Audio payload is {size} bytes, limit is {limit} bytes")]
    AudioTooLarge { size: u64, limit: u64 },

    #[error("Video is {duration_secs}s long, limit is {limit_secs}s")]
    VideoTooLong { duration_secs: u64, limit_secs: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl BlogError {
    /// Short machine-friendly name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            BlogError::InvalidUrl(_) => "InvalidUrl",
            BlogError::NoAudioStream(_) => "NoAudioStream",
            BlogError::DownloadFailed(_) => "DownloadFailed",
            BlogError::UploadFailed(_) => "UploadFailed",
            BlogError::TranscriptionFailed(_) => "TranscriptionFailed",
            BlogError::Timeout(_) => "Timeout",
            BlogError::MissingCredential(_) => "MissingCredential",
            BlogError::GenerationRejected(_) => "GenerationRejected",
            BlogError::ExhaustedRetries { .. } => "ExhaustedRetries",
            BlogError::AudioTooLarge { .. } => "AudioTooLarge",
            BlogError::VideoTooLong { .. } => "VideoTooLong",
            BlogError::Cancelled => "Cancelled",
        }
    }

    /// Message shown to the end user. One per failure kind, no internals.
    pub fn user_message(&self) -> String {
        match self {
            BlogError::InvalidUrl(_) => {
                "Please enter a valid YouTube URL (youtube.com/watch?v=..., youtu.be/..., or youtube.com/embed/...).".to_string()
            }
            BlogError::NoAudioStream(_) => {
                "Sorry, couldn't find a usable audio stream for this video.".to_string()
            }
            BlogError::DownloadFailed(_) => {
                "Downloading the video's audio failed. Check the URL and that yt-dlp is installed.".to_string()
            }
            BlogError::UploadFailed(_) => {
                "Uploading the audio to the transcription service failed.".to_string()
            }
            BlogError::TranscriptionFailed(reason) => format!("Transcription failed: {}", reason),
            BlogError::Timeout(after) => format!(
                "Transcription did not finish within {}. Try a shorter video.",
                utils::format_duration(after.as_secs_f64())
            ),
            BlogError::MissingCredential(name) => {
                format!("API key not set: {}. Export it or add it to your .env file.", name)
            }
            BlogError::GenerationRejected(_) => {
                "The language model refused to write this article.".to_string()
            }
            BlogError::ExhaustedRetries { attempts, .. } => format!(
                "The language model is unavailable right now (tried {} times). Please try again later.",
                attempts
            ),
            BlogError::AudioTooLarge { size, limit } => format!(
                "The audio is too large to transcribe ({}, limit {}).",
                utils::format_file_size(*size),
                utils::format_file_size(*limit)
            ),
            BlogError::VideoTooLong { duration_secs, limit_secs } => format!(
                "The video is {} long; videos up to {} are supported.",
                utils::format_duration(*duration_secs as f64),
                utils::format_duration(*limit_secs as f64)
            ),
            BlogError::Cancelled => "Cancelled.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_do_not_leak_details() {
        let err = BlogError::UploadFailed("HTTP 500: stack trace here".into());
        assert!(!err.user_message().contains("stack trace"));
        assert_eq!(err.kind(), "UploadFailed");
    }

    #[test]
    fn too_large_message_is_human_readable() {
        let err = BlogError::AudioTooLarge {
            size: 30 * 1024 * 1024,
            limit: 24 * 1024 * 1024,
        };
        assert!(err.user_message().contains("30.0 MB"));
        assert!(err.user_message().contains("24.0 MB"));
    }
}
