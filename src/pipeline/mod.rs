use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::generate::{Article, ContentGenerator};
use crate::prompt::PromptBuilder;
use crate::transcribe::{build_provider, TranscriptProvider};
use crate::video::VideoReference;
use crate::BlogError;

/// Where a pipeline run is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    ParsingUrl,
    FetchingTranscript,
    BuildingPrompt,
    Generating,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::ParsingUrl => "parsing URL",
            Stage::FetchingTranscript => "fetching transcript",
            Stage::BuildingPrompt => "building prompt",
            Stage::Generating => "generating article",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Something worth telling the user that does not stop the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    ShortTranscript { word_count: usize },
    TranscriptTruncated { chars: usize, budget: usize },
    LongVideo { duration_secs: u64 },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::ShortTranscript { word_count } => write!(
                f,
                "The transcript is very short ({} words). The article may be thin.",
                word_count
            ),
            PipelineWarning::TranscriptTruncated { chars, budget } => write!(
                f,
                "The transcript has {} characters, only the first {} were used.",
                chars, budget
            ),
            PipelineWarning::LongVideo { duration_secs } => write!(
                f,
                "The video is {} long, processing took a while.",
                crate::utils::format_duration(*duration_secs as f64)
            ),
        }
    }
}

/// Receives stage transitions and warnings as a run progresses
pub trait PipelineObserver: Send + Sync {
    fn on_stage(&self, _url: &str, _stage: Stage) {}

    fn on_warning(&self, _url: &str, _warning: &PipelineWarning) {}
}

/// Observer that writes to the log
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_stage(&self, url: &str, stage: Stage) {
        tracing::debug!(url, %stage, "Pipeline stage");
    }

    fn on_warning(&self, url: &str, warning: &PipelineWarning) {
        tracing::warn!(url, "{}", warning);
    }
}

/// Terminal state of one run
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Done {
        video: VideoReference,
        title: Option<String>,
        article: Article,
        warnings: Vec<PipelineWarning>,
    },
    Failed {
        stage: Stage,
        error: BlogError,
    },
}

impl PipelineOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, PipelineOutcome::Done { .. })
    }
}

/// URL in, article out
pub struct BlogPipeline {
    provider: Box<dyn TranscriptProvider>,
    generator: ContentGenerator,
    prompt_builder: PromptBuilder,
    long_video_secs: Option<u64>,
}

impl BlogPipeline {
    pub fn new(
        provider: Box<dyn TranscriptProvider>,
        generator: ContentGenerator,
        prompt_builder: PromptBuilder,
    ) -> Self {
        Self {
            provider,
            generator,
            prompt_builder,
            long_video_secs: None,
        }
    }

    /// Wire up the configured strategy and backend
    pub fn from_config(config: &Config) -> Self {
        let mut pipeline = Self::new(
            build_provider(config),
            ContentGenerator::from_config(config),
            PromptBuilder::new(config.prompt.max_transcript_chars),
        );
        pipeline.long_video_secs = Some(config.transcription.long_video_warning_secs);
        pipeline
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn backend_name(&self) -> &'static str {
        self.generator.backend_name()
    }

    /// Run one URL through every stage
    pub async fn run(
        &self,
        raw_url: &str,
        observer: &dyn PipelineObserver,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        let mut stage = Stage::Idle;
        observer.on_stage(raw_url, stage);

        let outcome = match self.advance(raw_url, observer, cancel, &mut stage).await {
            Ok(done) => done,
            Err(error) => {
                tracing::error!(url = raw_url, %stage, kind = error.kind(), "{}", error);
                PipelineOutcome::Failed { stage, error }
            }
        };

        let terminal = if outcome.is_done() { Stage::Done } else { Stage::Failed };
        observer.on_stage(raw_url, terminal);
        outcome
    }

    async fn advance(
        &self,
        raw_url: &str,
        observer: &dyn PipelineObserver,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<PipelineOutcome, BlogError> {
        let enter = |stage: &mut Stage, next: Stage| {
            *stage = next;
            observer.on_stage(raw_url, next);
        };
        let mut warnings = Vec::new();
        let mut warn = |warning: PipelineWarning| {
            observer.on_warning(raw_url, &warning);
            warnings.push(warning);
        };

        enter(stage, Stage::ParsingUrl);
        let video = VideoReference::parse(raw_url);
        let video_id = video
            .video_id()
            .ok_or_else(|| BlogError::InvalidUrl(raw_url.to_string()))?
            .to_string();
        tracing::info!(video_id = %video_id, "Processing video");

        // no network activity until both keys are known to be present
        if let Err(e) = self.provider.check_credentials() {
            *stage = Stage::FetchingTranscript;
            return Err(e);
        }
        if let Err(e) = self.generator.check_credentials() {
            *stage = Stage::Generating;
            return Err(e);
        }

        enter(stage, Stage::FetchingTranscript);
        let transcript = self.provider.fetch_transcript(&video, cancel).await?;
        tracing::info!(
            words = transcript.word_count,
            provider = self.provider.name(),
            "Transcript ready"
        );
        if transcript.low_confidence {
            warn(PipelineWarning::ShortTranscript {
                word_count: transcript.word_count,
            });
        }
        if let Some(limit) = self.long_video_secs {
            if transcript.source_duration_seconds > limit {
                warn(PipelineWarning::LongVideo {
                    duration_secs: transcript.source_duration_seconds,
                });
            }
        }

        enter(stage, Stage::BuildingPrompt);
        let request = self.prompt_builder.build(&transcript.text);
        if request.truncated {
            warn(PipelineWarning::TranscriptTruncated {
                chars: request.transcript_chars,
                budget: self.prompt_builder.max_transcript_chars(),
            });
        }

        enter(stage, Stage::Generating);
        let article = self.generator.generate(&request, cancel).await?;
        tracing::info!(attempts = article.attempts, backend = %article.backend, "Article generated");

        Ok(PipelineOutcome::Done {
            video,
            title: transcript.title,
            article,
            warnings,
        })
    }

    /// Run several URLs concurrently, outcomes in input order
    pub async fn run_many(
        &self,
        urls: &[String],
        concurrency: usize,
        observer: &dyn PipelineObserver,
        cancel: &CancellationToken,
    ) -> Vec<(String, PipelineOutcome)> {
        stream::iter(urls)
            .map(|url| async move { (url.clone(), self.run(url, observer, cancel).await) })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
