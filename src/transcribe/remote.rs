use async_trait::async_trait;
use indicatif::MultiProgress;
use reqwest::{Body, Client};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::processor::TranscriptionProcessor;
use super::{
    fetch_checked_metadata, require_video, stage_audio, until_cancelled, StagedAudio, Transcript,
    TranscriptProvider,
};
use crate::config::TranscriptionConfig;
use crate::video::{VideoPlatform, VideoReference};
use crate::BlogError;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// Downloads the audio, uploads it to AssemblyAI and polls for the result
pub struct AssemblyAiTranscriber {
    client: Client,
    api_key: Option<String>,
    platform: Box<dyn VideoPlatform>,
    settings: TranscriptionConfig,
    temp_dir: Option<PathBuf>,
    show_progress: bool,
    progress: MultiProgress,
}

impl AssemblyAiTranscriber {
    pub fn new(api_key: Option<String>, platform: Box<dyn VideoPlatform>, settings: TranscriptionConfig) -> Self {
        Self {
            client: Client::new(),
            api_key,
            platform,
            settings,
            temp_dir: None,
            show_progress: true,
            progress: MultiProgress::new(),
        }
    }

    /// Parent directory for staged audio, the system temp dir when `None`
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn base_url(&self) -> &str {
        self.settings.remote.base_url.trim_end_matches('/')
    }

    fn api_key(&self) -> Result<&str, BlogError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BlogError::MissingCredential(self.settings.remote.api_key_env.clone()))
    }

    /// Stream the staged file to the upload endpoint
    async fn upload(&self, api_key: &str, audio: &StagedAudio) -> Result<String, BlogError> {
        let file = tokio::fs::File::open(audio.path())
            .await
            .map_err(|e| BlogError::UploadFailed(format!("cannot read staged audio: {}", e)))?;
        let size = audio.size();

        tracing::info!(size = %crate::utils::format_file_size(size), "Uploading audio");

        let resp = self
            .client
            .post(format!("{}/v2/upload", self.base_url()))
            .header("authorization", api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| BlogError::UploadFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(BlogError::UploadFailed(format!("HTTP {}: {}", status, message.trim())));
        }

        let upload = resp
            .json::<UploadResponse>()
            .await
            .map_err(|e| BlogError::UploadFailed(format!("unreadable upload response: {}", e)))?;
        Ok(upload.upload_url)
    }

    /// Submit a transcription job for an uploaded file
    async fn create_job(&self, api_key: &str, audio_url: &str) -> Result<String, BlogError> {
        let body = json!({
            "audio_url": audio_url,
            "language_detection": true,
            "speech_model": self.settings.remote.speech_model,
        });

        let resp = self
            .client
            .post(format!("{}/v2/transcript", self.base_url()))
            .header("authorization", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("cannot submit transcription job: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(BlogError::TranscriptionFailed(format!(
                "cannot submit transcription job: HTTP {}: {}",
                status,
                message.trim()
            )));
        }

        let job = resp
            .json::<CreateResponse>()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("unreadable job response: {}", e)))?;
        Ok(job.id)
    }
}

#[async_trait]
impl TranscriptProvider for AssemblyAiTranscriber {
    async fn fetch_transcript(
        &self,
        video: &VideoReference,
        cancel: &CancellationToken,
    ) -> Result<Transcript, BlogError> {
        let (video_id, url) = require_video(video)?;
        let api_key = self.api_key()?;
        tracing::info!(video_id, "Transcribing with AssemblyAI");

        let metadata = until_cancelled(
            cancel,
            fetch_checked_metadata(self.platform.as_ref(), &url, &self.settings),
        )
        .await?;

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

        let uploaded = until_cancelled(cancel, self.upload(api_key, &audio)).await;
        audio.release();
        let audio_url = uploaded?;

        let job_id = until_cancelled(cancel, self.create_job(api_key, &audio_url)).await?;
        tracing::debug!(job_id = %job_id, "Transcription job submitted");

        let text = TranscriptionProcessor::new(
            &self.client,
            api_key,
            format!("{}/v2/transcript/{}", self.base_url(), job_id),
            &self.settings.remote,
            metadata.duration_seconds,
        )
        .with_progress(self.show_progress)
        .with_multi_progress(&self.progress)
        .wait_for_completion(cancel)
        .await?;

        Ok(Transcript::new(text, metadata.duration_seconds, self.settings.min_word_count)?
            .with_title(metadata.title))
    }

    fn check_credentials(&self) -> Result<(), BlogError> {
        self.api_key().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::tests::{is_empty_dir, platform_writing};
    use crate::video::youtube::MockVideoPlatform;
    use mockito::{Matcher, Server};

    const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn settings(server: &Server) -> TranscriptionConfig {
        let mut settings = TranscriptionConfig::default();
        settings.remote.base_url = server.url();
        settings.remote.poll_interval_ms = 10;
        settings.remote.min_poll_timeout_ms = 200;
        settings.remote.timeout_multiplier = 0.0;
        settings
    }

    fn transcriber(
        server: &Server,
        platform: MockVideoPlatform,
        temp_dir: &std::path::Path,
    ) -> AssemblyAiTranscriber {
        AssemblyAiTranscriber::new(Some("aai-key".into()), Box::new(platform), settings(server))
            .with_temp_dir(Some(temp_dir.to_path_buf()))
            .with_progress(false)
    }

    #[tokio::test]
    async fn uploads_submits_and_polls() {
        let mut server = Server::new_async().await;
        let upload = server
            .mock("POST", "/v2/upload")
            .match_header("authorization", "aai-key")
            .with_status(200)
            .with_body(r#"{"upload_url":"https://cdn.example/abc"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v2/transcript")
            .match_body(Matcher::PartialJson(json!({
                "audio_url": "https://cdn.example/abc",
                "language_detection": true,
                "speech_model": "universal"
            })))
            .with_status(200)
            .with_body(r#"{"id":"t1","status":"queued"}"#)
            .create_async()
            .await;
        let _poll = server
            .mock("GET", "/v2/transcript/t1")
            .with_status(200)
            .with_body(r#"{"id":"t1","status":"completed","text":"Hello world, this is a test video about cooking."}"#)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let transcript = transcriber(&server, platform_writing(2048, 95), staging.path())
            .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transcript.text, "Hello world, this is a test video about cooking.");
        assert_eq!(transcript.source_duration_seconds, 95);
        assert_eq!(transcript.title.as_deref(), Some("Cooking 101"));
        assert!(transcript.low_confidence);
        assert!(is_empty_dir(staging.path()));
        upload.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn failed_upload_still_removes_audio() {
        let mut server = Server::new_async().await;
        let _upload = server
            .mock("POST", "/v2/upload")
            .with_status(500)
            .with_body("storage unavailable")
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v2/transcript")
            .expect(0)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = transcriber(&server, platform_writing(2048, 95), staging.path())
            .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BlogError::UploadFailed(msg) if msg.contains("500")));
        assert!(is_empty_dir(staging.path()));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn job_error_is_reported() {
        let mut server = Server::new_async().await;
        let _upload = server
            .mock("POST", "/v2/upload")
            .with_status(200)
            .with_body(r#"{"upload_url":"https://cdn.example/abc"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/v2/transcript")
            .with_status(200)
            .with_body(r#"{"id":"t2"}"#)
            .create_async()
            .await;
        let _poll = server
            .mock("GET", "/v2/transcript/t2")
            .with_status(200)
            .with_body(r#"{"id":"t2","status":"error","error":"Unsupported audio format"}"#)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = transcriber(&server, platform_writing(2048, 95), staging.path())
            .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, BlogError::TranscriptionFailed("Unsupported audio format".into()));
        assert!(is_empty_dir(staging.path()));
    }

    #[tokio::test]
    async fn stuck_job_times_out() {
        let mut server = Server::new_async().await;
        let _upload = server
            .mock("POST", "/v2/upload")
            .with_status(200)
            .with_body(r#"{"upload_url":"https://cdn.example/abc"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/v2/transcript")
            .with_status(200)
            .with_body(r#"{"id":"t3"}"#)
            .create_async()
            .await;
        let _poll = server
            .mock("GET", "/v2/transcript/t3")
            .with_status(200)
            .with_body(r#"{"id":"t3","status":"processing"}"#)
            .create_async()
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = transcriber(&server, platform_writing(2048, 95), staging.path())
            .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BlogError::Timeout(_)));
    }

    #[tokio::test]
    async fn invalid_url_touches_nothing() {
        let server = Server::new_async().await;
        let staging = tempfile::tempdir().unwrap();

        let err = transcriber(&server, MockVideoPlatform::new(), staging.path())
            .fetch_transcript(&VideoReference::parse("not a url"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, BlogError::InvalidUrl("not a url".into()));
    }

    #[tokio::test]
    async fn missing_key_fails_before_download() {
        let server = Server::new_async().await;
        let transcriber =
            AssemblyAiTranscriber::new(None, Box::new(MockVideoPlatform::new()), settings(&server));

        assert_eq!(
            transcriber.check_credentials(),
            Err(BlogError::MissingCredential("ASSEMBLYAI_API_KEY".into()))
        );

        let err = transcriber
            .fetch_transcript(&VideoReference::parse(VIDEO), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BlogError::MissingCredential("ASSEMBLYAI_API_KEY".into()));
    }
}
