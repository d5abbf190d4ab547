//! Model runner: a fixed registry of named inference models behind a
//! uniform, cancellable, memory-safe call surface.
//!
//! Backends come in two families: deterministic in-process lexicon models
//! (always available, used as defaults and under test) and an
//! OpenAI-compatible HTTP backend for a local inference server. The runner
//! owns lazy loading, degraded-state handling, per-model concurrency limits
//! and the pre-call input-length guard; backends only run inference.

pub mod backend;
pub mod estimate;
pub mod http;
pub mod lexicon;
pub mod runner;
pub mod testing;

pub use backend::{
    ChatPrompt, ChatRole, ChatTurn, GeneratedText, InferenceBackend, LabelScore, ModelError,
    ModelInput, ModelOutput,
};
pub use runner::ModelRunner;
