use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RemoteSttConfig;
use crate::BlogError;

/// Status of a hosted transcription job
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct JobResponse {
    pub status: JobStatus,
    pub text: Option<String>,
    pub error: Option<String>,
}

/// Upper bound on any poll deadline
pub const MAX_POLL_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// How long to keep polling for a video of the given length, never more
/// than [`MAX_POLL_DEADLINE`]
pub fn poll_deadline(settings: &RemoteSttConfig, duration_secs: u64) -> Duration {
    let scaled = Duration::try_from_secs_f64(duration_secs as f64 * settings.timeout_multiplier)
        .unwrap_or(MAX_POLL_DEADLINE);
    scaled
        .max(Duration::from_millis(settings.min_poll_timeout_ms))
        .min(MAX_POLL_DEADLINE)
}

/// Soft progress estimate: half the video length (at least 30s) is treated
/// as the expected processing time, capped at 95% until the job completes.
pub fn estimate_progress(elapsed: Duration, duration_secs: u64) -> f64 {
    let expected = (duration_secs as f64 * 0.5).max(30.0);
    (elapsed.as_secs_f64() / expected).min(0.95)
}

/// Polls one transcription job until it settles
pub struct TranscriptionProcessor<'a> {
    client: &'a Client,
    api_key: &'a str,
    polling_endpoint: String,
    poll_interval: Duration,
    deadline: Duration,
    duration_secs: u64,
    show_progress: bool,
    multi: Option<&'a MultiProgress>,
}

impl<'a> TranscriptionProcessor<'a> {
    pub fn new(
        client: &'a Client,
        api_key: &'a str,
        polling_endpoint: String,
        settings: &RemoteSttConfig,
        duration_secs: u64,
    ) -> Self {
        Self {
            client,
            api_key,
            polling_endpoint,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            deadline: poll_deadline(settings, duration_secs),
            duration_secs,
            show_progress: true,
            multi: None,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Draw the bar under a shared [`MultiProgress`] so concurrent jobs
    /// get one line each
    pub fn with_multi_progress(mut self, multi: &'a MultiProgress) -> Self {
        self.multi = Some(multi);
        self
    }

    /// Wait for job completion with progress tracking
    pub async fn wait_for_completion(&self, cancel: &CancellationToken) -> Result<String, BlogError> {
        let progress = if self.show_progress {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            match self.multi {
                Some(multi) => multi.add(bar),
                None => bar,
            }
        } else {
            ProgressBar::hidden()
        };
        progress.set_message("Transcribing audio... This may take a few minutes.");

        let start = Instant::now();
        let deadline_at = start
            .checked_add(self.deadline)
            .unwrap_or_else(|| start + MAX_POLL_DEADLINE);
        let mut check_count = 0u32;

        loop {
            check_count += 1;

            let job = tokio::select! {
                _ = cancel.cancelled() => {
                    progress.abandon_with_message("Cancelled");
                    return Err(BlogError::Cancelled);
                }
                job = tokio::time::timeout_at(deadline_at, self.get_job()) => match job {
                    Ok(job) => job?,
                    Err(_) => {
                        progress.abandon_with_message("Timed out");
                        return Err(BlogError::Timeout(self.deadline));
                    }
                },
            };

            let estimate = estimate_progress(start.elapsed(), self.duration_secs);
            progress.set_position((estimate * 100.0) as u64);

            match job.status {
                JobStatus::Completed => {
                    progress.set_position(100);
                    progress.finish_with_message("Transcription completed!");
                    tracing::info!(checks = check_count, elapsed = ?start.elapsed(), "Transcription completed");
                    return Ok(job.text.unwrap_or_default());
                }
                JobStatus::Error => {
                    progress.abandon_with_message("Transcription failed");
                    let reason = job.error.unwrap_or_else(|| "unknown error".to_string());
                    tracing::error!(%reason, "Transcription job failed");
                    return Err(BlogError::TranscriptionFailed(reason));
                }
                JobStatus::Queued | JobStatus::Processing | JobStatus::Unknown => {
                    tracing::debug!(status = ?job.status, check = check_count, "Transcription still running");
                }
            }

            if Instant::now() + self.poll_interval > deadline_at {
                progress.abandon_with_message("Timed out");
                return Err(BlogError::Timeout(self.deadline));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    progress.abandon_with_message("Cancelled");
                    return Err(BlogError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Get transcription job status
    async fn get_job(&self) -> Result<JobResponse, BlogError> {
        let resp = self
            .client
            .get(&self.polling_endpoint)
            .header("authorization", self.api_key)
            .send()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("error checking transcription status: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(BlogError::TranscriptionFailed(format!(
                "error checking transcription status: HTTP {}: {}",
                status,
                message.trim()
            )));
        }

        resp.json::<JobResponse>()
            .await
            .map_err(|e| BlogError::TranscriptionFailed(format!("unreadable status response: {}", e)))
    }
}
