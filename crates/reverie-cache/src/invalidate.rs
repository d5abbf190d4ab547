//! Centralised invalidation planning.
//!
//! Every write to an entry, message, signal or vector record maps to one
//! [`WriteKind`]; the planner turns it into the exact key set to purge. No
//! other code constructs invalidation key lists.

use reverie_core::types::{EntryId, Fingerprint, SessionId, UserId};

use crate::keys::CacheKey;

/// Metrics whose per-user projections exist; kept in one place so a new
/// metric cannot be added without joining the invalidation plan.
pub const PROJECTION_METRICS: &[&str] = &[
    "mood_trend",
    "writing_stats",
    "topics",
    "patterns",
    "coverage",
];

/// A mutation the cache must react to.
#[derive(Debug, Clone)]
pub enum WriteKind {
    /// Entry created, edited or re-analyzed.
    EntryWrite {
        user: UserId,
        entry: EntryId,
        fingerprint: Fingerprint,
    },
    /// Entry soft-deleted.
    EntryDelete {
        user: UserId,
        entry: EntryId,
        fingerprint: Fingerprint,
    },
    /// A chat message landed in a session.
    MessageWrite { user: UserId, session: SessionId },
    /// A user was deleted with cascade.
    UserDelete { user: UserId, entries: Vec<EntryId> },
    /// The analysis version changed: every derived cache is stale.
    VersionBump,
}

/// The keys and prefixes a write invalidates.
#[derive(Debug, Clone, Default)]
pub struct InvalidationPlan {
    pub keys: Vec<CacheKey>,
    pub prefixes: Vec<String>,
    pub purge_all: bool,
}

pub fn plan(kind: &WriteKind) -> InvalidationPlan {
    match kind {
        WriteKind::EntryWrite {
            user,
            entry,
            fingerprint,
        }
        | WriteKind::EntryDelete {
            user,
            entry,
            fingerprint,
        } => InvalidationPlan {
            keys: vec![CacheKey::signal(fingerprint), CacheKey::embedding(entry)],
            prefixes: user_prefixes(user),
            purge_all: false,
        },
        WriteKind::MessageWrite { user, session } => InvalidationPlan {
            keys: vec![CacheKey::session_context(session)],
            // Message writes touch the short-window analytics and the
            // user's retrieval results, not the entry signals.
            prefixes: {
                let mut p = vec![format!("retrieval:{user}:")];
                p.extend(
                    PROJECTION_METRICS
                        .iter()
                        .map(|m| format!("analytics:{m}:{user}:")),
                );
                p
            },
            purge_all: false,
        },
        WriteKind::UserDelete { user, entries } => InvalidationPlan {
            keys: entries.iter().map(CacheKey::embedding).collect(),
            prefixes: user_prefixes(user),
            purge_all: false,
        },
        WriteKind::VersionBump => InvalidationPlan {
            keys: Vec::new(),
            prefixes: Vec::new(),
            purge_all: true,
        },
    }
}

fn user_prefixes(user: &UserId) -> Vec<String> {
    let mut prefixes = vec![format!("retrieval:{user}:")];
    prefixes.extend(
        PROJECTION_METRICS
            .iter()
            .map(|m| format!("analytics:{m}:{user}:")),
    );
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_write_purges_signal_embedding_and_user_projections() {
        let plan = plan(&WriteKind::EntryWrite {
            user: UserId::from("u1"),
            entry: EntryId::from("e1"),
            fingerprint: Fingerprint("f1".to_string()),
        });
        assert!(plan.keys.iter().any(|k| k.as_str() == "signal:f1"));
        assert!(plan.keys.iter().any(|k| k.as_str() == "embedding:e1"));
        assert!(plan
            .prefixes
            .iter()
            .any(|p| p == "analytics:mood_trend:u1:"));
        assert!(plan.prefixes.iter().any(|p| p == "retrieval:u1:"));
        assert!(!plan.purge_all);
    }

    #[test]
    fn message_write_purges_session_context() {
        let plan = plan(&WriteKind::MessageWrite {
            user: UserId::from("u1"),
            session: SessionId::from("s1"),
        });
        assert!(plan.keys.iter().any(|k| k.as_str() == "session:s1:context"));
    }

    #[test]
    fn version_bump_purges_everything() {
        assert!(plan(&WriteKind::VersionBump).purge_all);
    }
}
