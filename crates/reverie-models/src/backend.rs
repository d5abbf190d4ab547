use async_trait::async_trait;
use reverie_core::ErrorKind;
use serde::{Deserialize, Serialize};

/// Input to a model call.
#[derive(Debug, Clone)]
pub enum ModelInput {
    /// Plain text for classification and embedding tasks.
    Text(String),
    /// Structured prompt for generation tasks.
    Chat(ChatPrompt),
}

impl ModelInput {
    /// The text the input-length guard measures and truncates.
    ///
    /// For chat prompts that is the final user turn — the system directive
    /// and history are budgeted separately by the orchestrator.
    pub fn guarded_text(&self) -> &str {
        match self {
            ModelInput::Text(t) => t,
            ModelInput::Chat(p) => p
                .turns
                .last()
                .map(|t| t.content.as_str())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn with_guarded_text(self, text: String) -> Self {
        match self {
            ModelInput::Text(_) => ModelInput::Text(text),
            ModelInput::Chat(mut p) => {
                if let Some(last) = p.turns.last_mut() {
                    last.content = text;
                }
                ModelInput::Chat(p)
            }
        }
    }
}

/// A structured generation prompt: system directive plus ordered turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub system: String,
    pub turns: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Output of a model call.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// Per-label scores from a classifier.
    Labels(Vec<LabelScore>),
    /// Dense embedding vector.
    Embedding(Vec<f32>),
    /// Generated text with token accounting.
    Generation(GeneratedText),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedText {
    pub content: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Typed failures at the model boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// Device or resource error; the runner marks the model degraded and a
    /// background task attempts a reload. Retryable after a backoff.
    #[error("model fault: {0}")]
    Fault(String),

    /// An input exceeded the declared budget after the pre-call guard.
    /// Should not occur; indicates a bug in the guard, not in the caller.
    #[error("input of {tokens} tokens exceeds budget of {budget}")]
    InputTooLarge { tokens: usize, budget: usize },

    /// Model name absent from the registry, or the backend does not serve
    /// the requested task shape.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// Deadline elapsed or the caller cancelled.
    #[error("model call cancelled")]
    Cancelled,
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::Fault(_) => ErrorKind::ModelFault,
            ModelError::InputTooLarge { .. } => ErrorKind::InputInvalid,
            ModelError::Unavailable(_) => ErrorKind::ModelFault,
            ModelError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, ModelError::Fault(_))
    }
}

/// Common interface for all inference backends.
///
/// Implementations must be deterministic for identical input and identical
/// weights, and must not read mutable global state.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logging and error messages.
    fn name(&self) -> &str;

    /// Run one inference. The runner has already applied the length guard;
    /// backends may assume the input fits their declared budget.
    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError>;
}
