//! `HistoryStore` — append-only per-session conversation log.
//!
//! A bounded in-memory ring holds the most recent `K` entries per session
//! for fast reads; when the ring overflows, the evicted (oldest) entry is
//! appended to a durable backend, fire-and-forget from the caller's point
//! of view. Reads merge the durable backend (older entries) with the
//! in-memory ring (most recent entries).

pub mod sqlite;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::HistoryError;

pub use sqlite::SqliteHistoryBackend;

/// Number of most-recent entries kept in memory per session.
pub const RING_CAPACITY: usize = 100;

/// Which side of a conversation turn an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    User,
    Assistant,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::User => "user",
            Direction::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Result<Self, HistoryError> {
        match s {
            "user" => Ok(Direction::User),
            "assistant" => Ok(Direction::Assistant),
            other => Err(HistoryError::Storage(format!("unknown direction: {other}"))),
        }
    }
}

/// A single entry in a session's history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub session_name: String,
    pub seq: i64,
    pub direction: Direction,
    pub text: String,
    pub ts: DateTime<Utc>,
}

/// Durable overflow backend behind the in-memory ring.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError>;

    /// Entries for `session_name` with `seq < before_seq`, most recent
    /// first, limited to `limit`. Callers reverse to ascending order.
    async fn recent_before(
        &self,
        session_name: &str,
        before_seq: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// A backend that drops everything — used when no durable overflow is
/// configured (history beyond the ring is simply not retained).
pub struct NullHistoryBackend;

#[async_trait]
impl HistoryBackend for NullHistoryBackend {
    async fn append(&self, _entry: &HistoryEntry) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn recent_before(
        &self,
        _session_name: &str,
        _before_seq: i64,
        _limit: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(Vec::new())
    }
}

/// Append-only per-session history: bounded ring in front of a durable
/// backend.
pub struct HistoryStore {
    ring: Mutex<HashMap<String, VecDeque<HistoryEntry>>>,
    next_seq: Mutex<HashMap<String, i64>>,
    backend: Arc<dyn HistoryBackend>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn HistoryBackend>) -> Self {
        Self::with_capacity(backend, RING_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn HistoryBackend>, capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(HashMap::new()),
            backend,
            capacity,
        }
    }

    /// Append one entry. Never fails to the caller: a durable-write
    /// failure on ring overflow is logged and dropped.
    pub async fn append(&self, session_name: &str, direction: Direction, text: &str) {
        let seq = {
            let mut seqs = self.next_seq.lock().await;
            let counter = seqs.entry(session_name.to_string()).or_insert(0);
            let assigned = *counter;
            *counter += 1;
            assigned
        };

        let entry = HistoryEntry {
            session_name: session_name.to_string(),
            seq,
            direction,
            text: text.to_string(),
            ts: Utc::now(),
        };

        let evicted = {
            let mut ring = self.ring.lock().await;
            let dq = ring.entry(session_name.to_string()).or_default();
            dq.push_back(entry);
            if dq.len() > self.capacity {
                dq.pop_front()
            } else {
                None
            }
        };

        if let Some(evicted) = evicted {
            let backend = self.backend.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.append(&evicted).await {
                    tracing::warn!(error = %e, "failed to persist evicted history entry");
                }
            });
        }
    }

    /// Drop a session's in-memory ring and reset its sequence counter,
    /// without touching the durable backend. Used by the `/clean` command
    /// and by the administrative default-session close path.
    pub async fn clear_ring(&self, session_name: &str) {
        self.ring.lock().await.remove(session_name);
        self.next_seq.lock().await.remove(session_name);
    }

    /// The most recent `n` entries for a session, oldest first: durable
    /// backend entries followed by whatever is still in the ring.
    pub async fn recent(&self, session_name: &str, n: usize) -> Vec<HistoryEntry> {
        let ring_entries: Vec<HistoryEntry> = {
            let ring = self.ring.lock().await;
            ring.get(session_name)
                .map(|dq| dq.iter().cloned().collect())
                .unwrap_or_default()
        };

        if ring_entries.len() >= n {
            return ring_entries[ring_entries.len() - n..].to_vec();
        }

        let remaining = n - ring_entries.len();
        let earliest_seq_in_ring = ring_entries.first().map(|e| e.seq).unwrap_or(i64::MAX);
        let mut durable = match self
            .backend
            .recent_before(session_name, earliest_seq_in_ring, remaining)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "history backend read failed");
                Vec::new()
            }
        };
        durable.extend(ring_entries);
        durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ask_round_trip_appends_user_then_assistant() {
        let store = HistoryStore::new(Arc::new(NullHistoryBackend));
        store.append("alpha", Direction::User, "hi").await;
        store.append("alpha", Direction::Assistant, "hello").await;

        let recent = store.recent("alpha", 10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].direction, Direction::User);
        assert_eq!(recent[1].direction, Direction::Assistant);
    }

    #[tokio::test]
    async fn ring_overflow_evicts_oldest_to_backend() {
        let backend = Arc::new(InMemoryBackend::default());
        let store = HistoryStore::with_capacity(backend.clone(), 2);
        store.append("alpha", Direction::User, "one").await;
        store.append("alpha", Direction::User, "two").await;
        store.append("alpha", Direction::User, "three").await;

        // give the fire-and-forget persist task a moment to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let recent = store.recent("alpha", 3).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "one");
        assert_eq!(recent[2].text, "three");
    }

    #[tokio::test]
    async fn clear_ring_drops_in_memory_entries_only() {
        let backend = Arc::new(InMemoryBackend::default());
        let store = HistoryStore::with_capacity(backend.clone(), 2);
        store.append("alpha", Direction::User, "one").await;
        store.append("alpha", Direction::User, "two").await;
        store.append("alpha", Direction::User, "three").await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        store.clear_ring("alpha").await;

        assert!(store.recent("alpha", 10).await.is_empty());
        assert!(!backend.entries.lock().await.is_empty());
    }

    #[derive(Default)]
    struct InMemoryBackend {
        entries: Mutex<Vec<HistoryEntry>>,
    }

    #[async_trait]
    impl HistoryBackend for InMemoryBackend {
        async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
            self.entries.lock().await.push(entry.clone());
            Ok(())
        }

        async fn recent_before(
            &self,
            session_name: &str,
            before_seq: i64,
            limit: usize,
        ) -> Result<Vec<HistoryEntry>, HistoryError> {
            let entries = self.entries.lock().await;
            let mut matching: Vec<HistoryEntry> = entries
                .iter()
                .filter(|e| e.session_name == session_name && e.seq < before_seq)
                .cloned()
                .collect();
            matching.sort_by_key(|e| std::cmp::Reverse(e.seq));
            matching.truncate(limit);
            matching.reverse();
            Ok(matching)
        }
    }
}
