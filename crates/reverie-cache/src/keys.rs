//! The cache key namespace.
//!
//! Keys are namespaced by domain and are opaque to consumers outside the
//! engine. Every constructor lives here so the full keyspace is enumerable
//! in one place; the invalidation planner depends on these exact shapes.
//!
//! | prefix                          | holds                                |
//! |---------------------------------|--------------------------------------|
//! | `signal:{fingerprint}`          | analysis result keyed by fingerprint |
//! | `embedding:{entry}`             | an entry's embedding vector          |
//! | `analytics:{metric}:{user}:{bucket}` | a derived projection            |
//! | `retrieval:{user}:{hash}`       | a cached retrieval result            |
//! | `session:{session}:context`     | a session's retrieval context        |

use std::fmt;

use reverie_core::types::{EntryId, Fingerprint, SessionId, UserId};

/// TTL domain a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Transient projections — short TTL.
    Analytics,
    /// Marshalled signals — medium TTL.
    Signal,
    /// Embeddings — effectively permanent, invalidated only by content or
    /// version change.
    Embedding,
    /// Retrieval results and session context — very short TTL.
    Retrieval,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn signal(fingerprint: &Fingerprint) -> Self {
        Self(format!("signal:{fingerprint}"))
    }

    pub fn embedding(entry: &EntryId) -> Self {
        Self(format!("embedding:{entry}"))
    }

    pub fn analytics(metric: &str, user: &UserId, bucket: &str) -> Self {
        Self(format!("analytics:{metric}:{user}:{bucket}"))
    }

    pub fn retrieval(user: &UserId, probe_hash: &str) -> Self {
        Self(format!("retrieval:{user}:{probe_hash}"))
    }

    pub fn session_context(session: &SessionId) -> Self {
        Self(format!("session:{session}:context"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes_are_stable() {
        let user = UserId::from("u1");
        assert_eq!(
            CacheKey::analytics("mood", &user, "2026-07-01").as_str(),
            "analytics:mood:u1:2026-07-01"
        );
        assert_eq!(
            CacheKey::embedding(&EntryId::from("e9")).as_str(),
            "embedding:e9"
        );
        assert_eq!(
            CacheKey::session_context(&SessionId::from("s4")).as_str(),
            "session:s4:context"
        );
    }
}
