use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub mod captions;
pub mod local;
pub mod processor;
pub mod remote;

use crate::config::{Config, TranscriptStrategy, TranscriptionConfig};
use crate::video::{select_audio_stream, VideoMetadata, VideoPlatform, VideoReference, YtDlpClient};
use crate::BlogError;

/// Transcript of a video's audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// The transcribed text
    pub text: String,

    /// Duration of the source video in seconds, 0 when unknown
    pub source_duration_seconds: u64,

    pub word_count: usize,

    /// Set when the transcript is too short to make a good article
    pub low_confidence: bool,

    /// Video title if the provider learned it
    pub title: Option<String>,
}

impl Transcript {
    /// Wrap service output, rejecting empty text
    pub fn new(
        text: impl Into<String>,
        source_duration_seconds: u64,
        min_word_count: usize,
    ) -> Result<Self, BlogError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(BlogError::TranscriptionFailed("the service returned an empty transcript".into()));
        }

        let word_count = text.split_whitespace().count();
        let low_confidence = word_count < min_word_count;
        if low_confidence {
            tracing::warn!(word_count, min_word_count, "Transcript is very short");
        }

        Ok(Self {
            text,
            source_duration_seconds,
            word_count,
            low_confidence,
            title: None,
        })
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }
}

/// Source of video transcripts
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// Obtain the transcript for one video
    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        cancel: &CancellationToken,
    ) -> Result<Transcript, BlogError>;

    /// Fail fast, without network access, when a required key is missing
    fn check_credentials(&self) -> Result<(), BlogError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// Build the provider selected by `transcription.strategy`
pub fn build_provider(config: &Config) -> Box<dyn TranscriptProvider> {
    let settings = config.transcription.clone();
    let key = config.credentials.transcription_key.clone();
    let temp_dir = config.app.temp_dir.clone();

    match settings.strategy {
        TranscriptStrategy::Remote => Box::new(
            remote::AssemblyAiTranscriber::new(key, Box::new(YtDlpClient::new()), settings)
                .with_temp_dir(temp_dir)
                .with_progress(config.app.show_progress),
        ),
        TranscriptStrategy::Captions => Box::new(captions::CaptionsTranscriber::new(settings)),
        TranscriptStrategy::Local => Box::new(
            local::WhisperTranscriber::new(key, Box::new(YtDlpClient::new()), settings)
                .with_temp_dir(temp_dir),
        ),
    }
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, BlogError>
where
    F: std::future::Future<Output = Result<T, BlogError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(BlogError::Cancelled),
        result = fut => result,
    }
}

/// Video id and clean watch URL, or `InvalidUrl`
pub(crate) fn require_video(video: &VideoReference) -> Result<(&str, String), BlogError> {
    match (video.video_id(), video.canonical_url()) {
        (Some(id), Some(url)) => Ok((id, url)),
        _ => Err(BlogError::InvalidUrl(video.raw_url().to_string())),
    }
}

/// Enforce the configured duration limits
pub(crate) fn check_duration(duration_secs: u64, settings: &TranscriptionConfig) -> Result<(), BlogError> {
    if let Some(limit_secs) = settings.max_video_duration_secs {
        if duration_secs > limit_secs {
            return Err(BlogError::VideoTooLong {
                duration_secs,
                limit_secs,
            });
        }
    }

    if duration_secs > settings.long_video_warning_secs {
        tracing::warn!(
            "Video is {} long. Processing may take a while.",
            crate::utils::format_duration(duration_secs as f64)
        );
    }

    Ok(())
}

/// Fetch metadata and enforce the duration limits
pub(crate) async fn fetch_checked_metadata(
    platform: &dyn VideoPlatform,
    url: &str,
    settings: &TranscriptionConfig,
) -> Result<VideoMetadata, BlogError> {
    let metadata = platform.fetch_metadata(url).await?;
    check_duration(metadata.duration_seconds, settings)?;

    if let Some(title) = &metadata.title {
        tracing::info!(
            "Video: {} ({})",
            title,
            crate::utils::format_duration(metadata.duration_seconds as f64)
        );
    }

    Ok(metadata)
}

/// Audio staged on local disk for one request.
///
/// Lives in its own temporary directory, removed on `release` or drop.
#[derive(Debug)]
pub struct StagedAudio {
    dir: TempDir,
    path: PathBuf,
    extension: String,
    mime_type: &'static str,
}

impl StagedAudio {
    pub fn new(parent: Option<&Path>, extension: &str, mime_type: &'static str) -> Result<Self, BlogError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ytblog-audio-");

        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| BlogError::DownloadFailed(format!("cannot create staging directory: {}", e)))?;

        let extension = if extension.is_empty() { "bin" } else { extension };
        let path = dir.path().join(format!("audio.{}", extension));

        Ok(Self {
            dir,
            path,
            extension: extension.to_string(),
            mime_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Size on disk, 0 if nothing was written
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Delete the staged audio now
    pub fn release(self) {
        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(error = %e, dir = %dir.display(), "Failed to remove staged audio");
        } else {
            tracing::debug!(dir = %dir.display(), "Removed staged audio");
        }
    }
}

/// Select a stream, download it into a fresh staging directory and check it
pub(crate) async fn stage_audio(
    platform: &dyn VideoPlatform,
    url: &str,
    metadata: &VideoMetadata,
    settings: &TranscriptionConfig,
    temp_dir: Option<&Path>,
) -> Result<StagedAudio, BlogError> {
    let stream = select_audio_stream(&metadata.streams).ok_or_else(|| {
        BlogError::NoAudioStream("the video does not offer any audio stream".into())
    })?;

    let staged = StagedAudio::new(temp_dir, &stream.extension, stream.mime_type())?;
    tracing::info!(format_id = %stream.format_id, "Downloading audio from YouTube");

    platform
        .download_audio(
            url,
            stream,
            staged.path(),
            Duration::from_secs(settings.download_timeout_secs),
        )
        .await?;

    let size = staged.size();
    if size == 0 {
        return Err(BlogError::NoAudioStream("the downloaded audio is empty".into()));
    }
    if size < settings.min_audio_bytes {
        return Err(BlogError::NoAudioStream(format!(
            "the downloaded audio is too small to be valid ({} bytes)",
            size
        )));
    }

    tracing::debug!(size = %crate::utils::format_file_size(size), "Audio staged");
    Ok(staged)
}
