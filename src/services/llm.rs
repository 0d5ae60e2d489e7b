use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat-completion and embedding calls the pipeline stages depend on.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, LlmError>;

    async fn embed(&self, input: &str) -> Result<Vec<f32>, LlmError>;
}

/// Client for an OpenAI-compatible API.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        chat_model: &str,
        embedding_model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            chat_model: chat_model.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(LlmError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(LlmError::Http)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
        };

        let response: ChatResponse = self.post("/chat/completions", &request).await?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default())
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input,
        };

        let response: EmbeddingResponse = self.post("/embeddings", &request).await?;

        Ok(response
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No API key configured for the LLM client")]
    MissingApiKey,
}
