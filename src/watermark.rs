use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, OptionalExtension};

use crate::db::{parse_datetime, Database};
use crate::error::WatermarkError;

/// Per-category "last seen" instants, persisted in the local database.
///
/// Watermarks are monotonically non-decreasing: only an explicit
/// mark-as-seen advances them, and an attempt to move one backward is
/// rejected with [`WatermarkError::MovedBackward`] and no state change.
#[derive(Clone)]
pub struct WatermarkStore {
    db: Database,
}

impl WatermarkStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current watermark for a category; the epoch if never set, so a
    /// fresh install counts everything as unseen.
    pub async fn get(&self, category_id: &str) -> Result<DateTime<Utc>, WatermarkError> {
        let category = category_id.to_string();
        let stored = self
            .db
            .execute(move |conn| {
                let raw: Option<String> = conn
                    .query_row(
                        "SELECT seen_at FROM watermarks WHERE category_id = ?1",
                        params![category],
                        |row| row.get(0),
                    )
                    .optional()?;
                raw.map(|s| parse_datetime(&s)).transpose()
            })
            .await?;

        Ok(stored.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    /// Advance a category's watermark. Equal instants are accepted as a
    /// no-op; earlier instants are rejected. The write is durable before
    /// this returns, so a recomputation issued afterwards observes it.
    pub async fn advance(
        &self,
        category_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<(), WatermarkError> {
        let category = category_id.to_string();
        // Read-check-write runs as one task on the single DB thread, so
        // no other watermark write can interleave.
        let outcome = self
            .db
            .execute(move |conn| {
                let raw: Option<String> = conn
                    .query_row(
                        "SELECT seen_at FROM watermarks WHERE category_id = ?1",
                        params![category],
                        |row| row.get(0),
                    )
                    .optional()?;

                if let Some(raw) = raw {
                    let current = parse_datetime(&raw)?;
                    if instant < current {
                        return Ok(Err(WatermarkError::MovedBackward {
                            category,
                            attempted: instant,
                            current,
                        }));
                    }
                }

                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO watermarks (category_id, seen_at, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(category_id) DO UPDATE SET
                         seen_at = excluded.seen_at,
                         updated_at = excluded.updated_at",
                    params![category, instant.to_rfc3339(), now],
                )?;

                debug!("watermark for '{category}' advanced to {instant}");
                Ok(Ok(()))
            })
            .await?;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> WatermarkStore {
        let db = Database::new(dir.path().join("opsdesk.sqlite3")).unwrap();
        WatermarkStore::new(db)
    }

    #[tokio::test]
    async fn unset_watermark_defaults_to_epoch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let seen = store.get("tickets").await.unwrap();
        assert_eq!(seen, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn advance_persists_and_rereads() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let t = Utc::now();
        store.advance("tickets", t).await.unwrap();

        let seen = store.get("tickets").await.unwrap();
        assert_eq!(seen.timestamp_millis(), t.timestamp_millis());
    }

    #[tokio::test]
    async fn advance_rejects_moving_backward() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let t = Utc::now();
        store.advance("tickets", t).await.unwrap();

        let earlier = t - Duration::seconds(10);
        let err = store.advance("tickets", earlier).await.unwrap_err();
        assert!(matches!(err, WatermarkError::MovedBackward { .. }));

        // State unchanged after the rejection.
        let seen = store.get("tickets").await.unwrap();
        assert_eq!(seen.timestamp_millis(), t.timestamp_millis());
    }

    #[tokio::test]
    async fn advance_to_equal_instant_is_a_noop_success() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let t = Utc::now();
        store.advance("tickets", t).await.unwrap();
        store.advance("tickets", t).await.unwrap();
    }

    #[tokio::test]
    async fn categories_do_not_share_watermarks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let t = Utc::now();
        store.advance("tickets", t).await.unwrap();

        let seen = store.get("payouts").await.unwrap();
        assert_eq!(seen, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn watermark_survives_reopening_the_database() {
        let dir = TempDir::new().unwrap();
        let t = Utc::now();

        {
            let store = open_store(&dir).await;
            store.advance("tickets", t).await.unwrap();
        }

        let store = open_store(&dir).await;
        let seen = store.get("tickets").await.unwrap();
        assert_eq!(seen.timestamp_millis(), t.timestamp_millis());
    }
}
