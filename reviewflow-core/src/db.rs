use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::error::{Error, Result};
use crate::optimize::model::{
    OptimizationEvent, OptimizationMetadata, OptimizationPayload, OptimizationRecord, Savings,
};
use crate::types::{ArticleId, Decision, Verdict};

/// Opens (or creates) the SQLite database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// This function is the single entry point for all database connections.
/// It sets `busy_timeout` via the `Connection` method (not a PRAGMA string) to
/// ensure the setting takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_db(path: &str) -> std::result::Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;

    // Step 1: WAL pragmas, re-applied on every open.
    conn.call(|db| -> rusqlite::Result<()> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    })
    .await?;

    // Step 2: Checkpoint any leftover WAL from a previous run.
    conn.call(|db| -> rusqlite::Result<()> {
        db.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    })
    .await?;

    // Step 3: Apply schema migrations via schema_version versioning system.
    conn.call(|db| -> rusqlite::Result<()> { crate::schema::migrate(db) })
        .await?;

    Ok(conn)
}

/// Returns the current Unix timestamp in seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Replaces every stored decision for `article_id` with `decisions`.
///
/// Runs as one `BEGIN IMMEDIATE` transaction, so a reader never observes a
/// half-written set. Insertion order is kept in the `position` column.
///
/// # Errors
///
/// Returns `Error::Database` if the transaction fails; nothing is written then.
pub async fn save_decisions(
    conn: &Connection,
    article_id: ArticleId,
    decisions: &[Decision],
) -> Result<()> {
    let decisions = decisions.to_vec();

    conn.call(move |db| -> rusqlite::Result<()> {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM decisions WHERE article_id = ?1",
            rusqlite::params![article_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO decisions
                     (article_id, issue_id, position, verdict, custom_text, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, d) in decisions.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    article_id,
                    &d.issue_id,
                    position as i64,
                    d.verdict.as_str(),
                    &d.custom_text,
                    d.decided_at,
                ])?;
            }
        }
        tx.commit()
    })
    .await?;
    Ok(())
}

/// Loads the decisions stored for `article_id` in insertion order.
///
/// Returns an empty `Vec` for an article that was never saved.
///
/// # Errors
///
/// Returns `Error::Database` if the query fails or a row holds an unknown verdict.
pub async fn load_decisions(conn: &Connection, article_id: ArticleId) -> Result<Vec<Decision>> {
    let rows = conn
        .call(move |db| -> rusqlite::Result<Vec<Decision>> {
            let mut stmt = db.prepare(
                "SELECT issue_id, verdict, custom_text, decided_at
                 FROM decisions WHERE article_id = ?1 ORDER BY position",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![article_id], |r| {
                    let verdict: String = r.get(1)?;
                    let verdict = verdict.parse::<Verdict>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?;
                    Ok(Decision {
                        issue_id: r.get(0)?,
                        verdict,
                        custom_text: r.get(2)?,
                        decided_at: r.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;
    Ok(rows)
}

/// Records that the parsing step of `article_id` was confirmed.
///
/// The first confirmation time is kept; later calls only touch `updated_at`.
pub async fn mark_parsing_confirmed(conn: &Connection, article_id: ArticleId) -> Result<()> {
    conn.call(move |db| -> rusqlite::Result<()> {
        let now = now_secs();
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO article_status (article_id, parsing_confirmed_at, updated_at)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(article_id)
             DO UPDATE SET parsing_confirmed_at = COALESCE(parsing_confirmed_at, excluded.parsing_confirmed_at),
                           updated_at = excluded.updated_at",
            rusqlite::params![article_id, now],
        )?;
        tx.commit()
    })
    .await?;
    Ok(())
}

/// Returns when parsing was first confirmed for `article_id`, if ever.
pub async fn parsing_confirmed_at(conn: &Connection, article_id: ArticleId) -> Result<Option<i64>> {
    let at = conn
        .call(move |db| -> rusqlite::Result<Option<i64>> {
            let at: Option<Option<i64>> = db
                .query_row(
                    "SELECT parsing_confirmed_at FROM article_status WHERE article_id = ?1",
                    rusqlite::params![article_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(at.flatten())
        })
        .await?;
    Ok(at)
}

/// Inserts or wholesale replaces the optimization record of its article.
///
/// # Errors
///
/// Returns `Error::Serialization` if the payload cannot be encoded and
/// `Error::Database` if the upsert fails.
pub async fn put_record(conn: &Connection, record: &OptimizationRecord) -> Result<()> {
    let payload = serde_json::to_string(&record.payload())?;
    let article_id = record.article_id;
    let meta = record.metadata.clone();
    let input_tokens = to_column("input_tokens", meta.input_tokens)?;
    let output_tokens = to_column("output_tokens", meta.output_tokens)?;
    let duration_ms = to_column("duration_ms", meta.duration_ms)?;

    conn.call(move |db| -> rusqlite::Result<()> {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO optimization_records
                 (article_id, payload, cost_usd, input_tokens, output_tokens, duration_ms, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(article_id)
             DO UPDATE SET payload = excluded.payload,
                           cost_usd = excluded.cost_usd,
                           input_tokens = excluded.input_tokens,
                           output_tokens = excluded.output_tokens,
                           duration_ms = excluded.duration_ms,
                           generated_at = excluded.generated_at",
            rusqlite::params![
                article_id,
                &payload,
                meta.cost_usd,
                input_tokens,
                output_tokens,
                duration_ms,
                meta.generated_at,
            ],
        )?;
        tx.commit()
    })
    .await?;
    Ok(())
}

/// Loads the stored optimization record for `article_id`.
///
/// The returned record always has `metadata.cached == false`; marking cache
/// hits is the caller's concern.
pub async fn get_record(
    conn: &Connection,
    article_id: ArticleId,
) -> Result<Option<OptimizationRecord>> {
    let row = conn
        .call(move |db| -> rusqlite::Result<Option<(String, f64, u64, u64, u64, i64)>> {
            db.query_row(
                "SELECT payload, cost_usd, input_tokens, output_tokens, duration_ms, generated_at
                 FROM optimization_records WHERE article_id = ?1",
                rusqlite::params![article_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        column_u64(r, 2)?,
                        column_u64(r, 3)?,
                        column_u64(r, 4)?,
                        r.get(5)?,
                    ))
                },
            )
            .optional()
        })
        .await?;

    let Some((payload, cost_usd, input_tokens, output_tokens, duration_ms, generated_at)) = row
    else {
        return Ok(None);
    };
    let payload: OptimizationPayload = serde_json::from_str(&payload)?;
    let metadata = OptimizationMetadata {
        cost_usd,
        total_tokens: input_tokens.saturating_add(output_tokens),
        input_tokens,
        output_tokens,
        duration_ms,
        cached: false,
        generated_at,
        savings: Savings::estimate(cost_usd, input_tokens, output_tokens),
    };
    Ok(Some(OptimizationRecord::new(article_id, payload, metadata)))
}

/// Deletes the optimization record for `article_id`.
///
/// Returns `true` if a row was removed. Events are kept for reporting.
pub async fn delete_record(conn: &Connection, article_id: ArticleId) -> Result<bool> {
    let removed = conn
        .call(move |db| -> rusqlite::Result<usize> {
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let n = tx.execute(
                "DELETE FROM optimization_records WHERE article_id = ?1",
                rusqlite::params![article_id],
            )?;
            tx.commit()?;
            Ok(n)
        })
        .await?;
    Ok(removed > 0)
}

/// Appends one generation or cache-read event.
pub async fn append_event(conn: &Connection, event: &OptimizationEvent) -> Result<()> {
    let event = event.clone();
    let total_tokens = to_column("total_tokens", event.total_tokens)?;
    let duration_ms = to_column("duration_ms", event.duration_ms)?;

    conn.call(move |db| -> rusqlite::Result<()> {
        db.execute(
            "INSERT INTO optimization_events
                 (article_id, cached, cost_usd, total_tokens, duration_ms, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                event.article_id,
                event.cached,
                event.cost_usd,
                total_tokens,
                duration_ms,
                event.occurred_at,
            ],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

/// Loads every event with `occurred_at >= since`, oldest first.
pub async fn events_since(conn: &Connection, since: i64) -> Result<Vec<OptimizationEvent>> {
    let events = conn
        .call(move |db| -> rusqlite::Result<Vec<OptimizationEvent>> {
            let mut stmt = db.prepare(
                "SELECT article_id, cached, cost_usd, total_tokens, duration_ms, occurred_at
                 FROM optimization_events
                 WHERE occurred_at >= ?1
                 ORDER BY occurred_at, id",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![since], |r| {
                    Ok(OptimizationEvent {
                        article_id: r.get(0)?,
                        cached: r.get(1)?,
                        cost_usd: r.get(2)?,
                        total_tokens: column_u64(r, 3)?,
                        duration_ms: column_u64(r, 4)?,
                        occurred_at: r.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;
    Ok(events)
}

/// SQLite integers are signed; counts above `i64::MAX` are refused, not wrapped.
fn to_column(field: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::OutOfRange { field, value })
}

fn column_u64(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}
