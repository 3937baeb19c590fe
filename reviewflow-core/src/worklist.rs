//! The Worklist Service seam: where decisions and article status live.

use tokio_rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::types::{ArticleId, Decision};

/// Article-level persistence consumed by the review workflow.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Worklist: Send + Sync {
    /// Replaces the stored decisions of `article_id` (last write wins).
    async fn save_decisions(&self, article_id: ArticleId, decisions: &[Decision]) -> Result<()>;

    /// Decisions in the order they were first recorded; empty if none.
    async fn load_decisions(&self, article_id: ArticleId) -> Result<Vec<Decision>>;

    /// Status transition fired when the reviewer first leaves the parsing step.
    async fn mark_parsing_confirmed(&self, article_id: ArticleId) -> Result<()>;
}

/// [`Worklist`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteWorklist {
    conn: Connection,
}

impl SqliteWorklist {
    /// `conn` must come from [`db::open_db`] so the schema is in place.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// When parsing was first confirmed for `article_id`, if ever.
    pub async fn parsing_confirmed_at(&self, article_id: ArticleId) -> Result<Option<i64>> {
        db::parsing_confirmed_at(&self.conn, article_id).await
    }
}

#[async_trait::async_trait]
impl Worklist for SqliteWorklist {
    async fn save_decisions(&self, article_id: ArticleId, decisions: &[Decision]) -> Result<()> {
        db::save_decisions(&self.conn, article_id, decisions).await
    }

    async fn load_decisions(&self, article_id: ArticleId) -> Result<Vec<Decision>> {
        db::load_decisions(&self.conn, article_id).await
    }

    async fn mark_parsing_confirmed(&self, article_id: ArticleId) -> Result<()> {
        db::mark_parsing_confirmed(&self.conn, article_id).await
    }
}
