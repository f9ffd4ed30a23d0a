//! OpenAI-compatible provider implementation.
//!
//! Works with: Groq, OpenAI, OpenRouter, Ollama, vLLM, Together AI, and
//! any other endpoint exposing `/v1/chat/completions` and
//! `/v1/embeddings` in the OpenAI wire format.
//!
//! HTTP status codes are mapped onto the retryable/fatal split in
//! [`ModelError`]: 429 and 5xx are retryable, 4xx are fatal.

use async_trait::async_trait;
use parley_core::{ChatMessage, Completion, EmbeddingError, EmbeddingProvider, ModelError,
    ModelProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible chat completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider bound to one model.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        }
    }

    /// Create a Groq provider (convenience constructor).
    pub fn groq(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", api_key, model)
    }

    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

/// Map a non-200 status plus body into the provider error taxonomy.
fn status_to_error(status: u16, retry_after_secs: Option<u64>, body: String) -> ModelError {
    match status {
        429 => ModelError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(5),
        },
        401 | 403 => {
            ModelError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        500..=599 => ModelError::ServerError {
            status_code: status,
            message: body,
        },
        _ => ModelError::InvalidRequest(body),
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<Completion, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&messages),
            "stream": false,
        });

        debug!(
            provider = %self.name,
            model = %self.model,
            messages = messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after_secs = retry_after(&response);
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(status_to_error(status, retry_after_secs, error_body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidRequest(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(ModelError::EmptyResponse)?;

        let content = choice.message.content;
        if content.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        let total_tokens = api_response
            .usage
            .map(|u| u.total_tokens as i64)
            .unwrap_or(0);

        Ok(Completion {
            content,
            model: api_response.model,
            total_tokens,
        })
    }
}

/// An OpenAI-compatible embedding provider.
pub struct OpenAiCompatEmbedder {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiCompatEmbedder {
    /// Dimensionality of `text-embedding-3-small`, the default model.
    pub const DEFAULT_DIMENSION: usize = 1536;

    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            client,
        }
    }

    async fn request(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %self.model,
            count = inputs.len(),
            "Sending embedding request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Embedding provider returned error");
            // Transient statuses mean the provider is down, not that the
            // inputs are bad.
            return Err(if status == 429 || (500..=599).contains(&status) {
                EmbeddingError::Unavailable(format!("status {status}: {error_body}"))
            } else {
                EmbeddingError::GenerationFailed(format!("status {status}: {error_body}"))
            });
        }

        let api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| {
            EmbeddingError::GenerationFailed(format!("Failed to parse embedding response: {e}"))
        })?;

        if api_resp.data.len() != inputs.len() {
            return Err(EmbeddingError::GenerationFailed(format!(
                "Expected {} embeddings, got {}",
                inputs.len(),
                api_resp.data.len()
            )));
        }

        // The API may return entries out of order; `index` is authoritative.
        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.request(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationFailed("Empty embedding response".into()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groq_constructor() {
        let provider = OpenAiCompatProvider::groq("gsk-test", "llama-3.1-8b-instant");
        assert_eq!(provider.name(), "groq");
        assert!(provider.base_url.contains("api.groq.com"));
        assert_eq!(provider.model, "llama-3.1-8b-instant");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider =
            OpenAiCompatProvider::new("local", "http://localhost:8000/v1/", "key", "m");
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion_uses_wire_roles() {
        let messages = vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi"),
        ];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[2].role, "assistant");
    }

    #[test]
    fn rate_limit_status_maps_with_header() {
        let err = status_to_error(429, Some(17), String::new());
        match err {
            ModelError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 17),
            other => panic!("Expected RateLimited, got: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_statuses_are_fatal() {
        for status in [401, 403] {
            let err = status_to_error(status, None, String::new());
            assert!(matches!(err, ModelError::AuthenticationFailed(_)));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = status_to_error(502, None, "bad gateway".into());
        match &err {
            ModelError::ServerError {
                status_code,
                message,
            } => {
                assert_eq!(*status_code, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("Expected ServerError, got: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn bad_request_is_fatal() {
        let err = status_to_error(400, None, "missing messages".into());
        assert!(matches!(err, ModelError::InvalidRequest(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn parse_completion_response() {
        let data = r#"{
            "model": "llama-3.1-8b-instant",
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.model, "llama-3.1-8b-instant");
        assert_eq!(parsed.choices[0].message.content, "Hello!");
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn parse_completion_without_usage() {
        let data = r#"{"model": "m", "choices": [{"message": {"content": "hi"}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn parse_embedding_response_sorts_by_index() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ],
            "model": "text-embedding-3-small"
        }"#;
        let mut parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(parsed.data[1].embedding, vec![0.4, 0.5]);
    }
}
