//! OpenAI-compatible HTTP backend for a local inference server
//! (llama.cpp server, LM Studio, LocalAI, …).
//!
//! Serves generation via `/v1/chat/completions` and embeddings via
//! `/v1/embeddings`. Connection and timeout failures surface as
//! [`ModelError::Fault`] so the runner degrades the model and schedules a
//! reload; HTTP-level errors carry the status and body for diagnostics.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::{
    ChatRole, GeneratedText, InferenceBackend, ModelError, ModelInput, ModelOutput,
};

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    /// Model identifier sent to the remote server.
    remote_model: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, remote_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            remote_model: remote_model.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn generate(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let ModelInput::Chat(prompt) = input else {
            return Err(ModelError::Unavailable(
                "http generation serves chat prompts, not raw text".to_string(),
            ));
        };

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": prompt.system,
        })];
        for turn in &prompt.turns {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(serde_json::json!({ "role": role, "content": turn.content }));
        }

        let body = serde_json::json!({
            "model": self.remote_model,
            "messages": messages,
        });

        debug!(model = %self.remote_model, "sending chat completion request");
        let resp = self
            .client
            .post(self.endpoint("/v1/chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(connection_fault)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "chat completion API error");
            return Err(ModelError::Fault(format!(
                "inference server returned {status}: {text}"
            )));
        }

        let api: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Fault(format!("malformed completion response: {e}")))?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Fault("completion response had no choices".to_string()))?;

        Ok(ModelOutput::Generation(GeneratedText {
            content: choice.message.content,
            tokens_in: api.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            tokens_out: api.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
        }))
    }

    async fn embed(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let ModelInput::Text(text) = input else {
            return Err(ModelError::Unavailable(
                "http embedding serves text inputs, not chat prompts".to_string(),
            ));
        };

        let body = serde_json::json!({
            "model": self.remote_model,
            "input": text,
        });

        debug!(model = %self.remote_model, "sending embedding request");
        let resp = self
            .client
            .post(self.endpoint("/v1/embeddings"))
            .json(&body)
            .send()
            .await
            .map_err(connection_fault)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "embedding API error");
            return Err(ModelError::Fault(format!(
                "inference server returned {status}: {text}"
            )));
        }

        let api: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Fault(format!("malformed embedding response: {e}")))?;

        let mut vector = api
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ModelError::Fault("embedding response had no data".to_string()))?;

        // Consumers assume unit-norm embeddings; normalize here once so the
        // convention holds regardless of the remote model.
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(ModelOutput::Embedding(vector))
    }
}

fn connection_fault(e: reqwest::Error) -> ModelError {
    ModelError::Fault(if e.is_connect() || e.is_timeout() {
        format!("inference server unreachable: {e}")
    } else {
        format!("http error: {e}")
    })
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        match input {
            ModelInput::Chat(_) => self.generate(input).await,
            ModelInput::Text(_) => self.embed(input).await,
        }
    }
}

// OpenAI-compatible response types (private — deserialization only)

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}
