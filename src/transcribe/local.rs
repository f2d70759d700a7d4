use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::{
    fetch_checked_metadata, require_video, stage_audio, until_cancelled, StagedAudio, Transcript,
    TranscriptProvider,
};
use crate::config::TranscriptionConfig;
use crate::video::{select_audio_stream, VideoPlatform, VideoReference};
use crate::BlogError;

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Downloads the audio and sends it to a Whisper-compatible endpoint in one request
pub struct WhisperTranscriber {
    client: Client,
    api_key: Option<String>,
    platform: Box<dyn VideoPlatform>,
    settings: TranscriptionConfig,
    temp_dir: Option<PathBuf>,
}

impl WhisperTranscriber {
    pub fn new(api_key: Option<String>, platform: Box<dyn VideoPlatform>, settings: TranscriptionConfig) -> Self {
        Self {
            client: Client::new(),
            api_key,
            platform,
            settings,
            temp_dir: None,
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    fn api_key(&self) -> Result<&str, BlogError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BlogError::MissingCredential(self.settings.local.api_key_env.clone()))
    }

    fn check_size(&self, size: u64) -> Result<(), BlogError> {
        let limit = self.settings.local.max_upload_bytes;
        if size > limit {
            return Err(BlogError::AudioTooLarge { size, limit });
        }
        Ok(())
    }

    async fn transcribe_file(&self, api_key: &str, audio: &StagedAudio) -> Result<String, BlogError> {
        let bytes = tokio::fs::read(audio.path())
            .await
            .map_err(|e| BlogError::UploadFailed(format!("cannot read staged audio: {}", e)))?;

        let part = Part::bytes(bytes)
            .file_name(format!("audio.{}", audio.extension()))
            .mime_str(audio.mime_type())
            .map_err(|e| BlogError::UploadFailed(e.to_string()))?;

        let form = Form::new()
            .text("model", self.settings.local.model.clone())
            .text("response_format", "json")
            .part("file", part);

        let resp = self
            .client
            .post(format!(
                "{}/audio/transcriptions",
                self.settings.local.base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make http request"))
            .map_err(|e| BlogError::UploadFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(BlogError::TranscriptionFailed(format!("HTTP {}: {}", status, message.trim())));
        }

        let response = resp
            .json::<WhisperResponse>()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("unreadable transcription response: {}", e)))?;
        Ok(response.text)
    }
}

#[async_trait]
impl TranscriptProvider for WhisperTranscriber {
    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        cancel: &CancellationToken,
    ) -> Result<Transcript, BlogError> {
        let (video_id, url) = require_video(video)?;
        let api_key = self.api_key()?;
        tracing::info!(video_id, model = %self.settings.local.model, "Transcribing with Whisper");

        let metadata = until_cancelled(
            cancel,
            fetch_checked_metadata(self.platform.as_ref(), &url, &self.settings),
        )
        .await?;

        // skip the download when the advertised size is already over the cap
        if let Some(size) = select_audio_stream(&metadata.streams).and_then(|s| s.filesize) {
            self.check_size(size)?;
        }

        let audio = until_cancelled(
            cancel,
            stage_audio(
                self.platform.as_ref(),
                &url,
                &metadata,
                &self.settings,
                self.temp_dir.as_deref(),
            ),
        )
        .await?;

        let result = match self.check_size(audio.size()) {
            Ok(()) => until_cancelled(cancel, self.transcribe_file(api_key, &audio)).await,
            Err(e) => Err(e),
        };
        audio.release();

        Ok(Transcript::new(result?, metadata.duration_seconds, self.settings.min_word_count)?
            .with_title(metadata.title))
    }

    fn check_credentials(&self) -> Result<(), BlogError> {
        self.api_key().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::tests::{is_empty_dir, m4a_stream, platform_writing};
    use crate::video::youtube::MockVideoPlatform;
    use crate::video::{AudioStream, VideoMetadata};
    use mockito::{Matcher, Server};

    const VIDEO: &str = "https://www.youtube.com/shorts/dQw4w9WgXcQ";

    fn settings(server: &Server, max_upload_bytes: u64) -> TranscriptionConfig {
        let mut settings = TranscriptionConfig::default();
        settings.local.base_url = server.url();
        settings.local.max_upload_bytes = max_upload_bytes;
        settings
    }

    #[tokio::test]
    async fn sends_audio_as_multipart() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/audio/transcriptions")
            .match_header("authorization", "Bearer sk-test")
            .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
            .match_body(Matcher::Regex("whisper-1".into()))
            .with_status(200)
            .with_body(r#"{"text":"Welcome back to the channel"}"#)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let transcript = WhisperTranscriber::new(
            Some("sk-test".into()),
            Box::new(platform_writing(4096, 42)),
            settings(&server, 1024 * 1024),
        )
        .with_temp_dir(Some(staging.path().to_path_buf()))
        .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(transcript.text, "Welcome back to the channel");
        assert_eq!(transcript.source_duration_seconds, 42);
        assert!(is_empty_dir(staging.path()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn oversized_download_is_never_submitted() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/audio/transcriptions")
            .expect(0)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = WhisperTranscriber::new(
            Some("sk-test".into()),
            Box::new(platform_writing(8192, 42)),
            settings(&server, 4096),
        )
        .with_temp_dir(Some(staging.path().to_path_buf()))
        .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
        .await
        .unwrap_err();

        assert_eq!(err, BlogError::AudioTooLarge { size: 8192, limit: 4096 });
        assert!(is_empty_dir(staging.path()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn advertised_size_over_cap_skips_download() {
        let server = Server::new_async().await;
        let mut platform = MockVideoPlatform::new();
        platform.expect_fetch_metadata().returning(|_| {
            Ok(VideoMetadata {
                title: None,
                duration_seconds: 3600,
                streams: vec![AudioStream {
                    filesize: Some(50_000_000),
                    ..m4a_stream()
                }],
            })
        });
        platform.expect_download_audio().times(0);

        let err = WhisperTranscriber::new(Some("sk-test".into()), Box::new(platform), settings(&server, 4096))
            .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, BlogError::AudioTooLarge { size: 50_000_000, limit: 4096 });
    }

    #[tokio::test]
    async fn api_error_cleans_up() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/audio/transcriptions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided"}}"#)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = WhisperTranscriber::new(
            Some("sk-bad".into()),
            Box::new(platform_writing(4096, 42)),
            settings(&server, 1024 * 1024),
        )
        .with_temp_dir(Some(staging.path().to_path_buf()))
        .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, BlogError::TranscriptionFailed(msg) if msg.contains("401")));
        assert!(is_empty_dir(staging.path()));
    }

    #[test]
    fn missing_key_is_reported_by_env_name() {
        let transcriber = WhisperTranscriber::new(
            None,
            Box::new(MockVideoPlatform::new()),
            TranscriptionConfig::default(),
        );
        assert_eq!(
            transcriber.check_credentials(),
            Err(BlogError::MissingCredential("OPENAI_API_KEY".into()))
        );
    }
}
