//! Typed session context.
//!
//! The orchestrator accepts exactly this shape — session identity, type and
//! resolved retrieval parameters travel together, so a bare session id (or
//! worse, a session id masquerading as a context string) cannot reach the
//! turn protocol.

use reverie_core::config::ReverieConfig;
use reverie_core::types::{SessionId, SessionType, UserId};

/// Everything a turn needs to know about its session. Immutable for the
/// session's lifetime, like the session type itself.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub session_type: SessionType,
    /// Entries pulled by vector similarity.
    pub k: usize,
    /// Recent messages pulled from this session.
    pub recent_n: usize,
    /// Token budget for the merged retrieval context.
    pub token_budget: usize,
    /// Relative weight of similarity vs. recency when ranking entries.
    pub similarity_weight: f32,
    pub recency_weight: f32,
}

impl SessionContext {
    /// Resolve the context for a session: type presets first, then the
    /// per-type configuration overrides on top.
    pub fn resolve(
        config: &ReverieConfig,
        user_id: UserId,
        session_id: SessionId,
        session_type: SessionType,
    ) -> Self {
        let preset = TypePreset::for_type(session_type);
        let (k, recent_n, token_budget) = config.retrieval_for(session_type.as_str());
        Self {
            session_id,
            user_id,
            session_type,
            k: k.min(preset.max_k),
            recent_n,
            token_budget,
            similarity_weight: preset.similarity_weight,
            recency_weight: preset.recency_weight,
        }
    }

    pub fn directive(&self) -> &'static str {
        TypePreset::for_type(self.session_type).directive
    }
}

/// Per-type behavior that is not configuration: the system directive and
/// the similarity/recency balance.
struct TypePreset {
    directive: &'static str,
    similarity_weight: f32,
    recency_weight: f32,
    /// Ceiling on configured k — inner-voice sessions stay narrow no matter
    /// what the deployment config says.
    max_k: usize,
}

impl TypePreset {
    fn for_type(session_type: SessionType) -> &'static TypePreset {
        match session_type {
            SessionType::SupportiveListening => &SUPPORTIVE_LISTENING,
            SessionType::ReflectionBuddy => &REFLECTION_BUDDY,
            SessionType::InnerVoice => &INNER_VOICE,
        }
    }
}

static SUPPORTIVE_LISTENING: TypePreset = TypePreset {
    directive: "You are a warm, attentive listener. Reflect what the person is \
                feeling, validate it without judgment, and ask one gentle \
                open question at a time. Never give medical advice.",
    similarity_weight: 0.4,
    recency_weight: 0.6,
    max_k: 8,
};

static REFLECTION_BUDDY: TypePreset = TypePreset {
    directive: "You help the person notice patterns across their journal. \
                Connect what they just said to themes from their past entries, \
                name the pattern plainly, and invite them to explore it.",
    similarity_weight: 0.7,
    recency_weight: 0.3,
    max_k: 10,
};

static INNER_VOICE: TypePreset = TypePreset {
    directive: "You speak as the person's own calmer inner voice, in first \
                person plural. Short sentences. Ground observations in what \
                we have written before.",
    similarity_weight: 0.5,
    recency_weight: 0.5,
    max_k: 4,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_by_session_type() {
        let config = ReverieConfig::default();
        let supportive = SessionContext::resolve(
            &config,
            UserId::from("u1"),
            SessionId::from("s1"),
            SessionType::SupportiveListening,
        );
        let reflective = SessionContext::resolve(
            &config,
            UserId::from("u1"),
            SessionId::from("s2"),
            SessionType::ReflectionBuddy,
        );
        assert!(reflective.similarity_weight > supportive.similarity_weight);
        assert_ne!(supportive.directive(), reflective.directive());
    }

    #[test]
    fn inner_voice_caps_k_below_config() {
        let mut config = ReverieConfig::default();
        config.retrieval.k = 50;
        let ctx = SessionContext::resolve(
            &config,
            UserId::from("u1"),
            SessionId::from("s1"),
            SessionType::InnerVoice,
        );
        assert!(ctx.k <= 4);
    }
}
