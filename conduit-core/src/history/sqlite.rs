//! SQLite-backed [`HistoryBackend`].
//!
//! Uses connection pooling and WAL mode, migrations run automatically on
//! startup.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::errors::HistoryError;

use super::{Direction, HistoryBackend, HistoryEntry};

/// SQLite-based overflow store for history entries evicted from the
/// in-memory ring.
pub struct SqliteHistoryBackend {
    pool: SqlitePool,
}

impl SqliteHistoryBackend {
    /// `database_url` like `sqlite:path/to/history.db`.
    pub async fn new(database_url: &str) -> Result<Self, HistoryError> {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let path = PathBuf::from(url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HistoryError::Storage(format!("failed to create database directory: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(url)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::Storage(e.to_string()))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), HistoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HistoryError::Migration(e.to_string()))
    }
}

#[async_trait]
impl HistoryBackend for SqliteHistoryBackend {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            INSERT INTO history (session_name, seq, direction, text, ts)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.session_name)
        .bind(entry.seq)
        .bind(entry.direction.as_str())
        .bind(&entry.text)
        .bind(entry.ts.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn recent_before(
        &self,
        session_name: &str,
        before_seq: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows = sqlx::query(
            r#"
            SELECT session_name, seq, direction, text, ts
            FROM history
            WHERE session_name = ? AND seq < ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(session_name)
        .bind(before_seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HistoryError::Storage(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let direction_str: String = row.get("direction");
            let ts: i64 = row.get("ts");
            entries.push(HistoryEntry {
                session_name: row.get("session_name"),
                seq: row.get("seq"),
                direction: Direction::parse(&direction_str)?,
                text: row.get("text"),
                ts: Utc
                    .timestamp_opt(ts, 0)
                    .single()
                    .ok_or_else(|| HistoryError::Storage(format!("invalid timestamp: {ts}")))?,
            });
        }
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;
    use uuid::Uuid;

    async fn backend() -> SqliteHistoryBackend {
        let path = temp_dir().join(format!("conduit_history_test_{}.db", Uuid::new_v4()));
        let url = format!("sqlite:{}", path.display());
        SqliteHistoryBackend::new(&url)
            .await
            .expect("failed to create test backend")
    }

    fn entry(session: &str, seq: i64, text: &str) -> HistoryEntry {
        HistoryEntry {
            session_name: session.to_string(),
            seq,
            direction: Direction::User,
            text: text.to_string(),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_then_recent_before_returns_ascending_order() {
        let backend = backend().await;
        for i in 0..5 {
            backend
                .append(&entry("alpha", i, &format!("msg{i}")))
                .await
                .unwrap();
        }

        let entries = backend.recent_before("alpha", 5, 3).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "msg2");
        assert_eq!(entries[1].text, "msg3");
        assert_eq!(entries[2].text, "msg4");
    }

    #[tokio::test]
    async fn recent_before_filters_by_session() {
        let backend = backend().await;
        backend.append(&entry("alpha", 0, "a0")).await.unwrap();
        backend.append(&entry("beta", 0, "b0")).await.unwrap();

        let entries = backend.recent_before("alpha", 10, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "a0");
    }

    #[tokio::test]
    async fn recent_before_respects_seq_bound() {
        let backend = backend().await;
        for i in 0..3 {
            backend
                .append(&entry("alpha", i, &format!("msg{i}")))
                .await
                .unwrap();
        }

        let entries = backend.recent_before("alpha", 1, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "msg0");
    }
}
