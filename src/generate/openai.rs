use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{BackendError, ChatBackend, GenerationParams};

/// OpenAI-compatible `/chat/completions` client
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_key_env: api_key_env.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Rejected(format!("{} is not set", self.api_key_env)))?;

        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_output_tokens
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make http request"))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &message));
        }

        let response = resp.json::<CompletionResponse>().await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Transient("no choices in response".into()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(BackendError::Rejected(refusal));
        }
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(BackendError::Rejected("response blocked by content filter".into()));
        }

        choice
            .message
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| BackendError::Transient("empty response text".into()))
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn credential_name(&self) -> &str {
        &self.api_key_env
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> OpenAiClient {
        OpenAiClient::new(Some("sk-test".into()), "gpt-4o-mini", "OPENAI_API_KEY").with_base_url(server.url())
    }

    #[tokio::test]
    async fn sends_single_turn_chat() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "messages": [{ "role": "user", "content": "write it" }],
                "max_tokens": 4096
            })))
            .with_status(200)
            .with_body(
                r##"{"id":"c1","choices":[{"index":0,"message":{"role":"assistant","content":"# Blog"},"finish_reason":"stop"}]}"##,
            )
            .create_async()
            .await;

        let text = client(&server)
            .complete("write it", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(text, "# Blog");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn content_filter_is_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":""},"finish_reason":"content_filter"}]}"#)
            .create_async()
            .await;

        let err = client(&server)
            .complete("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server)
            .complete("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transient(_)));
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key"}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .complete("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(msg) if msg.contains("401")));
    }
}
