//! Analytics projections — derived, regenerable, never authoritative.

use reverie_core::types::UserId;

use crate::row::{self, optional, parse_ts};
use crate::types::ProjectionRecord;
use crate::{Result, Store, StoreError};

impl Store {
    pub fn put_projection(
        &self,
        user_id: &UserId,
        metric: &str,
        bucket: &str,
        payload: &serde_json::Value,
    ) -> Result<ProjectionRecord> {
        let now = row::now();
        let json =
            serde_json::to_string(payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO analytics_projections
             (user_id, metric, bucket, payload, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user_id.as_str(), metric, bucket, json, now],
        )?;
        Ok(ProjectionRecord {
            user_id: user_id.clone(),
            metric: metric.to_string(),
            bucket: bucket.to_string(),
            payload: payload.clone(),
            computed_at: parse_ts(&now).map_err(StoreError::Database)?,
        })
    }

    pub fn get_projection(
        &self,
        user_id: &UserId,
        metric: &str,
        bucket: &str,
    ) -> Result<Option<ProjectionRecord>> {
        let conn = self.lock();
        optional(conn.query_row(
            "SELECT user_id, metric, bucket, payload, computed_at
             FROM analytics_projections
             WHERE user_id = ?1 AND metric = ?2 AND bucket = ?3",
            rusqlite::params![user_id.as_str(), metric, bucket],
            |row| {
                let payload_json: String = row.get(3)?;
                Ok(ProjectionRecord {
                    user_id: UserId(row.get(0)?),
                    metric: row.get(1)?,
                    bucket: row.get(2)?,
                    payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
                    computed_at: parse_ts(&row.get::<_, String>(4)?)?,
                })
            },
        ))
    }

    /// Drop every stored projection for a user — the relational arm of an
    /// analytics invalidation.
    pub fn delete_projections(&self, user_id: &UserId) -> Result<usize> {
        let conn = self.lock();
        let n = conn.execute(
            "DELETE FROM analytics_projections WHERE user_id = ?1",
            rusqlite::params![user_id.as_str()],
        )?;
        Ok(n)
    }

    /// Drop all projections regardless of user — used on an
    /// analysis-version bump.
    pub fn delete_all_projections(&self) -> Result<usize> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM analytics_projections", [])?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_round_trip_and_invalidation() {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Ada").unwrap();
        let payload = serde_json::json!({ "trend": [0.1, 0.3], "coverage": 1.0 });
        store
            .put_projection(&user.id, "mood_trend", "2026-07", &payload)
            .unwrap();
        let back = store
            .get_projection(&user.id, "mood_trend", "2026-07")
            .unwrap()
            .unwrap();
        assert_eq!(back.payload, payload);

        assert_eq!(store.delete_projections(&user.id).unwrap(), 1);
        assert!(store
            .get_projection(&user.id, "mood_trend", "2026-07")
            .unwrap()
            .is_none());
    }
}
