use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::generate::{GenerationParams, RetryPolicy};

/// Largest accepted `transcription.remote.timeout_multiplier`
const MAX_TIMEOUT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transcript acquisition settings
    pub transcription: TranscriptionConfig,

    /// Language model settings
    pub llm: LlmConfig,

    /// Prompt settings
    pub prompt: PromptConfig,

    /// Application settings
    pub app: AppConfig,

    /// API keys, read from the environment and never written to disk
    #[serde(skip)]
    pub credentials: Credentials,
}

/// How transcripts are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStrategy {
    /// Upload audio to a hosted speech-to-text service and poll for the result
    Remote,
    /// Fetch the video's published captions
    Captions,
    /// Download audio locally and send it to a Whisper-compatible endpoint
    Local,
}

impl TranscriptStrategy {
    pub fn needs_yt_dlp(&self) -> bool {
        !matches!(self, TranscriptStrategy::Captions)
    }
}

impl std::fmt::Display for TranscriptStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptStrategy::Remote => write!(f, "remote"),
            TranscriptStrategy::Captions => write!(f, "captions"),
            TranscriptStrategy::Local => write!(f, "local"),
        }
    }
}

/// Which hosted chat API writes the article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Gemini => write!(f, "gemini"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub strategy: TranscriptStrategy,

    pub remote: RemoteSttConfig,

    pub captions: CaptionsConfig,

    pub local: LocalSttConfig,

    /// Transcripts with fewer words are flagged as low confidence
    pub min_word_count: usize,

    /// Downloads smaller than this are treated as missing audio
    pub min_audio_bytes: u64,

    /// Reject videos longer than this
    pub max_video_duration_secs: Option<u64>,

    /// Warn about videos longer than this
    pub long_video_warning_secs: u64,

    /// Per-download timeout for yt-dlp
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSttConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub speech_model: String,
    pub poll_interval_ms: u64,

    /// The poll deadline is this multiple of the video duration...
    pub timeout_multiplier: f64,

    /// ...but never less than this
    pub min_poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionsConfig {
    pub base_url: String,

    /// Caption languages in order of preference
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSttConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub gemini: LlmEndpoint,
    pub openai: LlmEndpoint,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Fraction of each delay that is randomised, 0.0 to 1.0
    pub jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Transcripts longer than this many characters are truncated
    pub max_transcript_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Parent directory for staged audio (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,

    /// Default output format
    pub default_output_format: String,

    /// Where --save writes articles (current directory if unset)
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent pipeline runs
    pub max_concurrent_jobs: usize,

    /// Draw progress bars and spinners
    pub show_progress: bool,
}

/// API keys for the transcription and language model services
#[derive(Clone, Default)]
pub struct Credentials {
    pub transcription_key: Option<String>,
    pub llm_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("transcription_key", &self.transcription_key.as_ref().map(|_| "<redacted>"))
            .field("llm_key", &self.llm_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            strategy: TranscriptStrategy::Remote,
            remote: RemoteSttConfig::default(),
            captions: CaptionsConfig::default(),
            local: LocalSttConfig::default(),
            min_word_count: 50,
            min_audio_bytes: 1000,
            max_video_duration_secs: None,
            long_video_warning_secs: 30 * 60,
            download_timeout_secs: 60,
        }
    }
}

impl Default for RemoteSttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.assemblyai.com".to_string(),
            api_key_env: "ASSEMBLYAI_API_KEY".to_string(),
            speech_model: "universal".to_string(),
            poll_interval_ms: 3000,
            timeout_multiplier: 3.0,
            min_poll_timeout_ms: 120_000,
        }
    }
}

impl Default for CaptionsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.youtube.com".to_string(),
            languages: vec!["en".to_string()],
        }
    }
}

impl Default for LocalSttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "whisper-1".to_string(),
            max_upload_bytes: 24 * 1024 * 1024,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Gemini,
            gemini: LlmEndpoint {
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-1.5-flash".to_string(),
                api_key_env: "GEMINI_API_KEY".to_string(),
            },
            openai: LlmEndpoint {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
            },
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 4096,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_transcript_chars: crate::prompt::DEFAULT_MAX_TRANSCRIPT_CHARS,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            default_output_format: "markdown".to_string(),
            output_dir: None,
            max_concurrent_jobs: 3,
            show_progress: true,
        }
    }
}

impl LlmConfig {
    /// Endpoint of the selected provider
    pub fn endpoint(&self) -> &LlmEndpoint {
        match self.provider {
            LlmProvider::Gemini => &self.gemini,
            LlmProvider::Openai => &self.openai,
        }
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }
}

impl TranscriptionConfig {
    /// Environment variable holding the key for the selected strategy
    pub fn api_key_env(&self) -> Option<&str> {
        match self.strategy {
            TranscriptStrategy::Remote => Some(self.remote.api_key_env.as_str()),
            TranscriptStrategy::Captions => None,
            TranscriptStrategy::Local => Some(self.local.api_key_env.as_str()),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config = Self::from_yaml(&content)?;
            tracing::debug!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("ytblog").join("config.yaml"))
    }

    /// Read API keys from the environment variables named in the config
    pub fn load_credentials(&mut self) {
        self.credentials = Credentials {
            transcription_key: self.transcription.api_key_env().and_then(read_env_key),
            llm_key: read_env_key(&self.llm.endpoint().api_key_env),
        };
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.prompt.max_transcript_chars == 0 {
            anyhow::bail!("prompt.max_transcript_chars must be greater than zero");
        }

        if self.llm.retry.max_attempts == 0 {
            anyhow::bail!("llm.retry.max_attempts must be at least 1");
        }

        if !(0.0..=1.0).contains(&self.llm.retry.jitter) {
            anyhow::bail!("llm.retry.jitter must be between 0.0 and 1.0");
        }

        if self.transcription.remote.poll_interval_ms == 0 {
            anyhow::bail!("transcription.remote.poll_interval_ms must be greater than zero");
        }

        let multiplier = self.transcription.remote.timeout_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 || multiplier > MAX_TIMEOUT_MULTIPLIER {
            anyhow::bail!(
                "transcription.remote.timeout_multiplier must be greater than 0 and at most {}",
                MAX_TIMEOUT_MULTIPLIER
            );
        }

        let max_poll_ms = crate::transcribe::processor::MAX_POLL_DEADLINE.as_millis() as u64;
        if self.transcription.remote.min_poll_timeout_ms > max_poll_ms {
            anyhow::bail!(
                "transcription.remote.min_poll_timeout_ms must be at most {} (24 hours)",
                max_poll_ms
            );
        }

        if crate::cli::OutputFormat::from_name(&self.app.default_output_format).is_none() {
            anyhow::bail!(
                "app.default_output_format must be markdown, text or json, got {:?}",
                self.app.default_output_format
            );
        }

        if self.app.max_concurrent_jobs == 0 {
            anyhow::bail!("app.max_concurrent_jobs must be at least 1");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        let key_status = |key: &Option<String>| if key.is_some() { "set" } else { "missing" };

        println!("Current Configuration:");
        println!("  Transcript Strategy: {}", self.transcription.strategy);
        if let Some(env) = self.transcription.api_key_env() {
            println!("  Transcription Key ({}): {}", env, key_status(&self.credentials.transcription_key));
        }
        println!("  LLM Provider: {} ({})", self.llm.provider, self.llm.endpoint().model);
        println!(
            "  LLM Key ({}): {}",
            self.llm.endpoint().api_key_env,
            key_status(&self.credentials.llm_key)
        );
        println!("  Max Transcript Chars: {}", self.prompt.max_transcript_chars);
        println!("  Retry Attempts: {}", self.llm.retry.max_attempts);
        if let Some(limit) = self.transcription.max_video_duration_secs {
            println!("  Max Video Duration: {}", crate::utils::format_duration(limit as f64));
        }
        println!("  Default Format: {}", self.app.default_output_format);
    }
}

fn read_env_key(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.prompt.max_transcript_chars, 25_000);
        assert_eq!(config.transcription.local.max_upload_bytes, 24 * 1024 * 1024);
        assert_eq!(config.transcription.remote.poll_interval_ms, 3000);
        assert_eq!(config.llm.endpoint().api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "transcription:\n  strategy: captions\nllm:\n  provider: openai\n  retry:\n    max_attempts: 5\n",
        )
        .unwrap();

        assert_eq!(config.transcription.strategy, TranscriptStrategy::Captions);
        assert_eq!(config.transcription.api_key_env(), None);
        assert_eq!(config.llm.provider, LlmProvider::Openai);
        assert_eq!(config.llm.endpoint().model, "gpt-4o-mini");
        assert_eq!(config.llm.retry.max_attempts, 5);
        assert_eq!(config.llm.retry.base_delay_ms, 2000);
        assert_eq!(config.transcription.min_word_count, 50);
    }

    #[test]
    fn rejects_invalid_thresholds() {
        assert!(Config::from_yaml("prompt:\n  max_transcript_chars: 0\n").is_err());
        assert!(Config::from_yaml("llm:\n  retry:\n    max_attempts: 0\n").is_err());
        assert!(Config::from_yaml("llm:\n  retry:\n    jitter: 1.5\n").is_err());
        assert!(Config::from_yaml("app:\n  max_concurrent_jobs: 0\n").is_err());
        tokio_test::assert_err!(Config::from_yaml("app:\n  default_output_format: srt\n"));

        for multiplier in [".inf", ".nan", "-1.0", "0.0", "1e300"] {
            let yaml = format!("transcription:\n  remote:\n    timeout_multiplier: {}\n", multiplier);
            assert!(Config::from_yaml(&yaml).is_err(), "accepted {}", multiplier);
        }
        tokio_test::assert_err!(Config::from_yaml(
            "transcription:\n  remote:\n    min_poll_timeout_ms: 18446744073709551615\n"
        ));
    }

    #[test]
    fn credentials_are_never_serialized_or_printed() {
        let mut config = Config::default();
        config.credentials.llm_key = Some("secret-llm-key".to_string());

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret-llm-key"));
        assert!(!format!("{:?}", config).contains("secret-llm-key"));
    }

    #[test]
    fn retry_policy_from_config() {
        let policy = Config::default().llm.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
