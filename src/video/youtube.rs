use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::BlogError;

/// Metadata about a video and its downloadable streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: Option<String>,

    /// Duration in whole seconds, 0 when unknown
    pub duration_seconds: u64,

    pub streams: Vec<AudioStream>,
}

/// One downloadable stream carrying audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub format_id: String,

    /// Container extension (m4a, webm, mp4, ...)
    pub extension: String,

    /// True when the stream has no video track
    pub audio_only: bool,

    pub filesize: Option<u64>,

    /// Average audio bitrate in kbit/s
    pub bitrate: Option<f64>,
}

impl AudioStream {
    pub fn mime_type(&self) -> &'static str {
        match self.extension.as_str() {
            "m4a" | "mp4" => "audio/mp4",
            "webm" => "audio/webm",
            "mp3" => "audio/mpeg",
            "ogg" | "opus" => "audio/ogg",
            "wav" => "audio/wav",
            _ => "application/octet-stream",
        }
    }
}

/// Access to a video hosting platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoPlatform: Send + Sync {
    /// Fetch title, duration and the list of audio-carrying streams
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, BlogError>;

    /// Download one stream to `dest`, giving up after `timeout`
    async fn download_audio(
        &self,
        url: &str,
        stream: &AudioStream,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), BlogError>;
}

/// Pick the stream to transcribe: audio-only m4a/mp4, then audio-only webm,
/// then any audio-only stream, then a progressive stream, then anything.
/// Within a tier the highest bitrate wins, the first listed on ties.
pub fn select_audio_stream(streams: &[AudioStream]) -> Option<&AudioStream> {
    let audio_only = || streams.iter().filter(|s| s.audio_only);

    highest_bitrate(audio_only().filter(|s| matches!(s.extension.as_str(), "m4a" | "mp4")))
        .or_else(|| highest_bitrate(audio_only().filter(|s| s.extension == "webm")))
        .or_else(|| highest_bitrate(audio_only()))
        .or_else(|| highest_bitrate(streams.iter().filter(|s| !s.audio_only)))
        .or_else(|| streams.first())
}

fn highest_bitrate<'a>(streams: impl Iterator<Item = &'a AudioStream>) -> Option<&'a AudioStream> {
    streams.reduce(|best, s| {
        if s.bitrate.unwrap_or(0.0) > best.bitrate.unwrap_or(0.0) {
            s
        } else {
            best
        }
    })
}

/// YouTube client backed by the yt-dlp executable
pub struct YtDlpClient {
    yt_dlp_path: String,
}

impl YtDlpClient {
    pub fn new() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: path.into(),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Get raw video information using yt-dlp
    async fn get_video_info(&self, url: &str) -> Result<Value, BlogError> {
        tracing::debug!("Extracting video info for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-playlist", "--no-warnings", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BlogError::DownloadFailed(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(BlogError::DownloadFailed(format!("yt-dlp failed: {}", error.trim())));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| BlogError::DownloadFailed(format!("unreadable yt-dlp output: {}", e)))
    }
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn yt-dlp `--dump-json` output into metadata
pub fn parse_video_info(info: &Value) -> VideoMetadata {
    let title = info["title"].as_str().map(|s| s.to_string());
    let duration_seconds = info["duration"].as_f64().map(|d| d.max(0.0) as u64).unwrap_or(0);

    let streams = info["formats"]
        .as_array()
        .map(|formats| formats.iter().filter_map(parse_format).collect())
        .unwrap_or_default();

    VideoMetadata {
        title,
        duration_seconds,
        streams,
    }
}

fn parse_format(format: &Value) -> Option<AudioStream> {
    let acodec = format["acodec"].as_str().unwrap_or("none");
    if acodec == "none" {
        return None;
    }
    let vcodec = format["vcodec"].as_str().unwrap_or("none");

    Some(AudioStream {
        format_id: format["format_id"].as_str()?.to_string(),
        extension: format["ext"].as_str().unwrap_or("").to_string(),
        audio_only: vcodec == "none",
        filesize: format["filesize"]
            .as_u64()
            .or_else(|| format["filesize_approx"].as_u64()),
        bitrate: format["abr"].as_f64(),
    })
}

#[async_trait]
impl VideoPlatform for YtDlpClient {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, BlogError> {
        let info = self.get_video_info(url).await?;
        let metadata = parse_video_info(&info);

        tracing::info!(
            title = metadata.title.as_deref().unwrap_or("Unknown Title"),
            duration_seconds = metadata.duration_seconds,
            streams = metadata.streams.len(),
            "Fetched video metadata"
        );

        Ok(metadata)
    }

    async fn download_audio(
        &self,
        url: &str,
        stream: &AudioStream,
        dest: &Path,
        timeout: Duration,
    ) -> Result<(), BlogError> {
        tracing::debug!(format_id = %stream.format_id, dest = %dest.display(), "Downloading audio stream");

        let mut command = Command::new(&self.yt_dlp_path);
        command
            .arg("--format")
            .arg(&stream.format_id)
            .arg("--output")
            .arg(dest)
            .args(["--no-playlist", "--no-part", "--no-warnings", "--force-overwrites"])
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                BlogError::DownloadFailed(format!("download did not finish within {}s", timeout.as_secs()))
            })?
            .map_err(|e| BlogError::DownloadFailed(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(BlogError::DownloadFailed(error.trim().to_string()));
        }

        Ok(())
    }
}
