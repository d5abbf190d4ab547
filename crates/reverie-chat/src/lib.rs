//! Conversation orchestration: typed session context, retrieval-backed
//! prompt composition, and the per-turn protocol that keeps message
//! sequences gapless and never persists a partial assistant turn.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod retrieval;

pub use context::SessionContext;
pub use error::ChatError;
pub use orchestrator::{ConversationOrchestrator, TurnOutcome};
