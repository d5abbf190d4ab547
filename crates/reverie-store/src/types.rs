use chrono::{DateTime, Utc};
use reverie_core::types::{
    AnalysisVersion, EntryId, Fingerprint, MessageId, MessageRole, SessionId, SessionStatus,
    SessionType, TopicId, UserId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub id: TopicId,
    pub user_id: UserId,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: EntryId,
    pub user_id: UserId,
    pub topic_id: Option<TopicId>,
    pub content: String,
    /// Maintained in lockstep with `content` on every write.
    pub word_count: usize,
    pub char_count: usize,
    pub analysis_version: AnalysisVersion,
    pub content_fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub theme: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: MessageRole,
    /// Gapless, strictly increasing within the session, starting at 1.
    pub seq: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub user_id: UserId,
    pub metric: String,
    pub bucket: String,
    pub payload: serde_json::Value,
    pub computed_at: DateTime<Utc>,
}

/// One row of the append-only migration log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub timestamp: DateTime<Utc>,
    pub from_version: Option<String>,
    pub to_version: String,
    pub scope: String,
    pub notes: Option<String>,
}
