//! Keyed storage for optimization records and the event log.
//!
//! The service owns a store handle (`Arc<dyn RecordStore>`) instead of any
//! process-wide cache, so tests get isolated instances for free.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::optimize::model::{OptimizationEvent, OptimizationRecord};
use crate::types::ArticleId;

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, article_id: ArticleId) -> Result<Option<OptimizationRecord>>;

    /// Inserts or wholesale replaces the record of `record.article_id`.
    async fn put(&self, record: &OptimizationRecord) -> Result<()>;

    /// Returns `true` if a record existed.
    async fn remove(&self, article_id: ArticleId) -> Result<bool>;

    async fn append_event(&self, event: &OptimizationEvent) -> Result<()>;

    /// Events with `occurred_at >= since`, oldest first.
    async fn events_since(&self, since: i64) -> Result<Vec<OptimizationEvent>>;
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<ArticleId, OptimizationRecord>,
    events: Vec<OptimizationEvent>,
}

/// In-process store, mostly for tests and one-shot tools.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, article_id: ArticleId) -> Result<Option<OptimizationRecord>> {
        Ok(self.with(|inner| inner.records.get(&article_id).cloned()))
    }

    async fn put(&self, record: &OptimizationRecord) -> Result<()> {
        let mut record = record.clone();
        record.metadata.cached = false;
        self.with(|inner| inner.records.insert(record.article_id, record));
        Ok(())
    }

    async fn remove(&self, article_id: ArticleId) -> Result<bool> {
        Ok(self.with(|inner| inner.records.remove(&article_id).is_some()))
    }

    async fn append_event(&self, event: &OptimizationEvent) -> Result<()> {
        self.with(|inner| inner.events.push(event.clone()));
        Ok(())
    }

    async fn events_since(&self, since: i64) -> Result<Vec<OptimizationEvent>> {
        Ok(self.with(|inner| {
            let mut events: Vec<_> = inner
                .events
                .iter()
                .filter(|e| e.occurred_at >= since)
                .cloned()
                .collect();
            events.sort_by_key(|e| e.occurred_at);
            events
        }))
    }
}

/// Store backed by the shared WAL-mode SQLite database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// `conn` must come from [`db::open_db`] so the schema is in place.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, article_id: ArticleId) -> Result<Option<OptimizationRecord>> {
        db::get_record(&self.conn, article_id).await
    }

    async fn put(&self, record: &OptimizationRecord) -> Result<()> {
        db::put_record(&self.conn, record).await
    }

    async fn remove(&self, article_id: ArticleId) -> Result<bool> {
        db::delete_record(&self.conn, article_id).await
    }

    async fn append_event(&self, event: &OptimizationEvent) -> Result<()> {
        db::append_event(&self.conn, event).await
    }

    async fn events_since(&self, since: i64) -> Result<Vec<OptimizationEvent>> {
        db::events_since(&self.conn, since).await
    }
}
