use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{BackendError, ChatBackend, GenerationParams};

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

/// Google Gemini `generateContent` client
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_key_env: api_key_env.into(),
            model: model.into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(prompt: &str, params: &GenerationParams) -> serde_json::Value {
        let safety_settings: Vec<_> = SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": SAFETY_THRESHOLD }))
            .collect();

        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [{ "text": prompt }]
                }
            ],
            "generationConfig": {
                "temperature": params.temperature,
                "topP": params.top_p,
                "topK": params.top_k,
                "maxOutputTokens": params.max_output_tokens
            },
            "safetySettings": safety_settings
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn extract_text(response: GenerateContentResponse) -> Result<String, BackendError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(BackendError::Rejected(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Transient("no candidates in response".into()))?;

    if let Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) =
        candidate.finish_reason.as_deref()
    {
        return Err(BackendError::Rejected(format!("response blocked: {}", reason)));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(BackendError::Transient("empty response text".into()));
    }

    Ok(text)
}

#[async_trait]
impl ChatBackend for GeminiClient {
    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<String, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Rejected(format!("{} is not set", self.api_key_env)))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(&self.model)
        );

        let resp = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .json(&Self::request_body(prompt, params))
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make http request"))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &message));
        }

        let response = resp.json::<GenerateContentResponse>().await?;
        extract_text(response)
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn credential_name(&self) -> &str {
        &self.api_key_env
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> GeminiClient {
        GeminiClient::new(Some("test-key".into()), "gemini-1.5-flash", "GEMINI_API_KEY")
            .with_base_url(server.url())
    }

    #[tokio::test]
    async fn sends_prompt_and_parameters() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-1.5-flash:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::PartialJson(json!({
                "contents": [{ "parts": [{ "text": "write it" }] }],
                "generationConfig": { "maxOutputTokens": 4096, "topK": 40 },
                "safetySettings": [{ "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE" }]
            })))
            .with_status(200)
            .with_body(
                r##"{"candidates":[{"content":{"role":"model","parts":[{"text":"# Blog"},{"text":"\n\nBody"}]},"finishReason":"STOP"}]}"##,
            )
            .create_async()
            .await;

        let text = client(&server)
            .complete("write it", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(text, "# Blog\n\nBody");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn blocked_prompt_is_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .complete("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn safety_finish_reason_is_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#)
            .create_async()
            .await;

        let err = client(&server)
            .complete("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("quota exceeded")
            .create_async()
            .await;

        let err = client(&server)
            .complete("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transient(msg) if msg.contains("429")));
    }
}
