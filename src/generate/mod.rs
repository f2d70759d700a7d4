use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod gemini;
pub mod openai;
pub mod retry;

pub use retry::RetryPolicy;

use crate::config::{Config, LlmProvider};
use crate::prompt::GenerationRequest;
use crate::BlogError;

/// Sampling parameters sent with every chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 4096,
        }
    }
}

/// How a single chat request failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Transport failure, rate limit or server error, worth retrying
    #[error("transient: {0}")]
    Transient(String),

    /// The API refused the request, retrying will not help
    #[error("rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            BackendError::Transient(message)
        } else {
            BackendError::Rejected(message)
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transient(e.to_string())
    }
}

/// A hosted chat-completion API
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one single-turn chat request and return the reply text
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError>;

    /// Whether an API key is configured
    fn has_credential(&self) -> bool;

    /// Environment variable the key is read from, for error messages
    fn credential_name(&self) -> &str;

    fn name(&self) -> &'static str;
}

/// Generated article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub markdown: String,

    /// Attempts it took, the successful one included
    pub attempts: u32,

    /// Backend that wrote it
    pub backend: String,
}

/// Calls a chat backend with a retry policy
pub struct ContentGenerator {
    backend: Box<dyn ChatBackend>,
    params: GenerationParams,
    policy: RetryPolicy,
}

impl ContentGenerator {
    pub fn new(backend: Box<dyn ChatBackend>, params: GenerationParams, policy: RetryPolicy) -> Self {
        Self {
            backend,
            params,
            policy,
        }
    }

    /// Build the generator for the configured provider
    pub fn from_config(config: &Config) -> Self {
        let endpoint = config.llm.endpoint();
        let api_key = config.credentials.llm_key.clone();

        let backend: Box<dyn ChatBackend> = match config.llm.provider {
            LlmProvider::Gemini => Box::new(
                gemini::GeminiClient::new(api_key, &endpoint.model, &endpoint.api_key_env)
                    .with_base_url(&endpoint.base_url),
            ),
            LlmProvider::Openai => Box::new(
                openai::OpenAiClient::new(api_key, &endpoint.model, &endpoint.api_key_env)
                    .with_base_url(&endpoint.base_url),
            ),
        };

        Self::new(backend, config.llm.params(), config.llm.retry_policy())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Fail fast when the backend has no API key
    pub fn check_credentials(&self) -> Result<(), BlogError> {
        if self.backend.has_credential() {
            Ok(())
        } else {
            Err(BlogError::MissingCredential(self.backend.credential_name().to_string()))
        }
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Article, BlogError> {
        self.check_credentials()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(
                backend = self.backend.name(),
                attempt,
                max_attempts = self.policy.max_attempts,
                "Requesting article from language model"
            );

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(BlogError::Cancelled),
                result = self.backend.complete(&request.prompt_text, &self.params) => result,
            };

            let reason = match result {
                Ok(markdown) => {
                    return Ok(Article {
                        markdown,
                        attempts: attempt,
                        backend: self.backend.name().to_string(),
                    })
                }
                Err(BackendError::Rejected(reason)) => {
                    tracing::error!(backend = self.backend.name(), %reason, "Generation rejected");
                    return Err(BlogError::GenerationRejected(reason));
                }
                Err(BackendError::Transient(reason)) => reason,
            };

            if !self.policy.should_retry(attempt) {
                tracing::error!(attempts = attempt, %reason, "Giving up on language model");
                return Err(BlogError::ExhaustedRetries {
                    attempts: attempt,
                    last_error: reason,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(attempt, ?delay, %reason, "Transient generation failure, backing off");

            tokio::select! {
                _ = cancel.cancelled() => return Err(BlogError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
