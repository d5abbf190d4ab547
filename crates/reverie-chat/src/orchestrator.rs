//! The per-turn conversation protocol.
//!
//! Order of operations matters here and mirrors the store's locking rules:
//! the user turn commits first (its own transaction), signals and retrieval
//! happen outside any lock, the prompt is composed before generation, and
//! the assistant turn commits only after the model has answered in full —
//! a generation fault never leaves a partial assistant turn behind.

use std::sync::Arc;
use std::time::Duration;

use reverie_analysis::{AnalysisError, AnalysisPipeline};
use reverie_cache::invalidate::{plan, WriteKind};
use reverie_cache::keys::{CacheKey, Domain};
use reverie_cache::CacheLayer;
use reverie_core::signal::SignalRecord;
use reverie_core::types::{EntryId, MessageRole, SessionStatus, UserId};
use sha2::{Digest, Sha256};
use reverie_models::{ChatPrompt, ChatRole, ChatTurn, ModelError, ModelInput, ModelOutput, ModelRunner};
use reverie_store::{MessageRecord, Store, StoreError};
use reverie_vector::VectorIndex;
use tracing::{debug, info, instrument, warn};

use crate::context::SessionContext;
use crate::error::ChatError;
use crate::retrieval::{self, TurnContext};

/// Result of one completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub user_message: MessageRecord,
    pub assistant_message: MessageRecord,
    pub user_signal: Option<SignalRecord>,
    pub assistant_signal: Option<SignalRecord>,
    /// True when the user turn's crisis score met the configured threshold
    /// (inclusive); surfaced for the crisis policy outside this core.
    pub crisis_flagged: bool,
    /// Entry ids that made it into the prompt context, for auditability.
    pub retrieved_entries: Vec<EntryId>,
}

pub struct ConversationOrchestrator {
    store: Arc<Store>,
    vector: Arc<VectorIndex>,
    runner: Arc<ModelRunner>,
    pipeline: Arc<AnalysisPipeline>,
    cache: Arc<CacheLayer>,
    generation_model: String,
    crisis_threshold: f32,
    deadline: Duration,
}

impl ConversationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        vector: Arc<VectorIndex>,
        runner: Arc<ModelRunner>,
        pipeline: Arc<AnalysisPipeline>,
        cache: Arc<CacheLayer>,
        crisis_threshold: f32,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            vector,
            runner,
            pipeline,
            cache,
            generation_model: "generation".to_string(),
            crisis_threshold,
            deadline,
        }
    }

    /// Run one full turn with the configured default deadline.
    pub async fn take_turn(
        &self,
        ctx: &SessionContext,
        content: &str,
    ) -> Result<TurnOutcome, ChatError> {
        self.take_turn_with_deadline(ctx, content, self.deadline)
            .await
    }

    /// Run one full turn: append the user message, analyze it, retrieve
    /// context, generate, append the assistant message, analyze that too.
    /// `deadline` covers the whole chain; the remainder at each stage is
    /// what the model calls get.
    #[instrument(skip(self, ctx, content, deadline), fields(session = %ctx.session_id, user = %ctx.user_id))]
    pub async fn take_turn_with_deadline(
        &self,
        ctx: &SessionContext,
        content: &str,
        deadline: Duration,
    ) -> Result<TurnOutcome, ChatError> {
        let started = std::time::Instant::now();
        if content.trim().is_empty() {
            return Err(ChatError::Store(StoreError::InvalidInput(
                "message content must not be empty".to_string(),
            )));
        }
        // Session must exist, belong to this user, and be open.
        let session = self
            .store
            .get_session(&ctx.user_id, &ctx.session_id)?
            .ok_or_else(|| StoreError::not_found("session", ctx.session_id.as_str()))?;
        if session.status != SessionStatus::Active {
            return Err(ChatError::Store(StoreError::SessionClosed(
                ctx.session_id.as_str().to_string(),
            )));
        }

        // 1. Commit the user turn; its sequence number is fixed from here on.
        let user_message = self.store.append_message(
            &ctx.user_id,
            &ctx.session_id,
            MessageRole::User,
            content,
        )?;

        // 2. Signal path. A total analysis failure degrades the turn (no
        // signal, no crisis flag) rather than losing the user's message.
        let remaining = deadline.saturating_sub(started.elapsed());
        let user_signal = self
            .analyze_message(&ctx.user_id, &user_message, remaining)
            .await?;
        let crisis_flagged = user_signal
            .as_ref()
            .and_then(|s| s.crisis.as_ref())
            .map(|c| c.score >= self.crisis_threshold)
            .unwrap_or(false);
        if crisis_flagged {
            info!(message = %user_message.id, "turn flagged for crisis policy");
        }

        // 3. Retrieval: vector similarity within this user plus session
        // recency, merged under the context token budget.
        let turn_context = self.retrieve(ctx, &user_message, user_signal.as_ref())?;
        let retrieved_entries = turn_context
            .entries
            .iter()
            .map(|e| e.entry.id.clone())
            .collect();

        // 4–5. Compose outside any lock, then generate with what is left of
        // the deadline.
        let prompt = compose_prompt(ctx, &turn_context, content);
        let remaining = deadline.saturating_sub(started.elapsed());
        let generated = match self
            .runner
            .infer(&self.generation_model, ModelInput::Chat(prompt), remaining)
            .await
        {
            Ok(ModelOutput::Generation(g)) => g,
            Ok(other) => {
                return Err(ChatError::Generation(ModelError::Fault(format!(
                    "generation model returned unexpected output shape: {other:?}"
                ))))
            }
            // No assistant turn is persisted on any generation failure.
            Err(e) => return Err(ChatError::Generation(e)),
        };

        // 6. Commit the assistant turn; strictly after the user's.
        let assistant_message = self.store.append_message(
            &ctx.user_id,
            &ctx.session_id,
            MessageRole::Assistant,
            &generated.content,
        )?;
        debug_assert!(assistant_message.seq > user_message.seq);

        // The assistant turn goes through the same signal path. Both turns
        // are already committed, so a deadline expiring here degrades to a
        // missing signal instead of failing a turn that did happen.
        let remaining = deadline.saturating_sub(started.elapsed());
        let assistant_signal = match self
            .analyze_message(&ctx.user_id, &assistant_message, remaining)
            .await
        {
            Ok(signal) => signal,
            Err(ChatError::Analysis(AnalysisError::Cancelled)) => {
                warn!(message = %assistant_message.id, "assistant signal skipped: deadline elapsed");
                None
            }
            Err(e) => return Err(e),
        };

        // 7. Session-scoped cache invalidation.
        self.cache.apply(&plan(&WriteKind::MessageWrite {
            user: ctx.user_id.clone(),
            session: ctx.session_id.clone(),
        }));

        debug!(
            user_seq = user_message.seq,
            assistant_seq = assistant_message.seq,
            retrieved = turn_context.entries.len(),
            "turn complete"
        );

        Ok(TurnOutcome {
            user_message,
            assistant_message,
            user_signal,
            assistant_signal,
            crisis_flagged,
            retrieved_entries,
        })
    }

    /// Analyze one message and attach its signal. Degrades to `None` on a
    /// total extractor failure; aborts only on cancellation.
    async fn analyze_message(
        &self,
        user_id: &UserId,
        message: &MessageRecord,
        deadline: Duration,
    ) -> Result<Option<SignalRecord>, ChatError> {
        match self
            .pipeline
            .analyze_with_deadline(&message.content, deadline)
            .await
        {
            Ok(record) => {
                self.store
                    .save_message_signal(user_id, &message.id, &record)?;
                Ok(Some(record))
            }
            Err(AnalysisError::Cancelled) => Err(ChatError::Analysis(AnalysisError::Cancelled)),
            Err(e) => {
                warn!(message = %message.id, error = %e, "message analysis unavailable");
                Ok(None)
            }
        }
    }

    fn retrieve(
        &self,
        ctx: &SessionContext,
        user_message: &MessageRecord,
        user_signal: Option<&SignalRecord>,
    ) -> Result<TurnContext, ChatError> {
        // Recent turns come through the session-context cache, invalidated
        // on every message write. The message we just appended is excluded —
        // it is passed to the prompt separately as the current turn.
        let context_key = CacheKey::session_context(&ctx.session_id);
        let mut recent: Vec<MessageRecord> = match self.cache.get(&context_key) {
            Ok(Some(cached)) => cached,
            _ => {
                let fresh = self.store.recent_messages(
                    &ctx.user_id,
                    &ctx.session_id,
                    ctx.recent_n + 1,
                )?;
                self.cache.put(&context_key, &fresh, Domain::Retrieval);
                fresh
            }
        };
        recent.retain(|m| m.id != user_message.id);

        let hits: Vec<(EntryId, f32)> = match user_signal.and_then(|s| s.embedding.as_ref()) {
            Some(probe) => {
                // Retrieval results are cached by probe (and k, which varies
                // per session type); entry and message writes purge the
                // user's whole retrieval namespace.
                let probe_key = CacheKey::retrieval(&ctx.user_id, &probe_hash(probe, ctx.k));
                match self.cache.get::<Vec<(EntryId, f32)>>(&probe_key) {
                    Ok(Some(cached)) => cached,
                    _ => {
                        let hits: Vec<(EntryId, f32)> = self
                            .vector
                            .query(&ctx.user_id, probe, ctx.k, |_| true)?
                            .into_iter()
                            .map(|hit| (hit.entry_id, hit.score))
                            .collect();
                        self.cache.put(&probe_key, &hits, Domain::Retrieval);
                        hits
                    }
                }
            }
            // No embedding (extractor down): recency-only context.
            None => Vec::new(),
        };

        let mut candidates = Vec::with_capacity(hits.len());
        for (entry_id, score) in hits {
            // The index is a lookup aid; the store stays authoritative (and
            // enforces user scoping again).
            if let Some(entry) = self.store.get_entry(&ctx.user_id, &entry_id)? {
                candidates.push((entry, score));
            }
        }

        Ok(retrieval::assemble(
            candidates,
            recent,
            ctx.similarity_weight,
            ctx.recency_weight,
            ctx.token_budget,
        ))
    }
}

/// Stable hash of a probe embedding plus the query width, for retrieval
/// cache keys.
fn probe_hash(probe: &[f32], k: usize) -> String {
    let mut hasher = Sha256::new();
    for value in probe {
        hasher.update(value.to_le_bytes());
    }
    hasher.update((k as u64).to_le_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest)
}

/// First 16 bytes of the digest as lowercase hex — plenty for a cache key.
fn hex_prefix(digest: &[u8]) -> String {
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Build the generation prompt: type directive plus context block as the
/// system message, then recent turns, then the current user message.
fn compose_prompt(ctx: &SessionContext, turn_context: &TurnContext, content: &str) -> ChatPrompt {
    let mut system = String::from(ctx.directive());
    if !turn_context.entries.is_empty() {
        system.push_str("\n\nRelevant journal entries:\n");
        for item in &turn_context.entries {
            let date = item.entry.created_at.format("%Y-%m-%d");
            system.push_str(&format!("- [{date}] {}\n", item.entry.content));
        }
    }

    let mut turns: Vec<ChatTurn> = turn_context
        .recent
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| ChatTurn {
            role: match m.role {
                MessageRole::Assistant => ChatRole::Assistant,
                _ => ChatRole::User,
            },
            content: m.content.clone(),
        })
        .collect();
    turns.push(ChatTurn {
        role: ChatRole::User,
        content: content.to_string(),
    });

    ChatPrompt { system, turns }
}
