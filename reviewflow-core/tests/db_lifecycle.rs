//! Integration test for the database lifecycle.
//!
//! Exercises: open_db, migrate, save_decisions / load_decisions across
//! connections, mark_parsing_confirmed, record upsert and the event log.

use reviewflow_core::db;
use reviewflow_core::error::Error;
use reviewflow_core::optimize::model::{
    Faq, OptimizationEvent, OptimizationMetadata, OptimizationPayload, OptimizationRecord,
    Savings, SeoSuggestions,
};
use reviewflow_core::types::{Decision, Verdict};

fn temp_db_path() -> String {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.keep().join("test.db");
    path.to_string_lossy().to_string()
}

fn record(article_id: i64, cost_usd: f64, faqs: usize) -> OptimizationRecord {
    let payload = OptimizationPayload {
        title_suggestions: Vec::new(),
        seo_suggestions: SeoSuggestions {
            focus_keyword: "spring".into(),
            primary_keywords: vec!["a".into(), "b".into(), "c".into()],
            secondary_keywords: vec!["d".into(), "e".into(), "f".into()],
            meta_description: "A meta description that is comfortably long enough.".into(),
            tags: Vec::new(),
        },
        faqs: (0..faqs)
            .map(|i| Faq {
                question: format!("Question {i}?"),
                answer: format!("Answer number {i}."),
            })
            .collect(),
    };
    let metadata = OptimizationMetadata {
        cost_usd,
        total_tokens: 3000,
        input_tokens: 2000,
        output_tokens: 1000,
        duration_ms: 1200,
        cached: false,
        generated_at: db::now_secs(),
        savings: Savings::estimate(cost_usd, 2000, 1000),
    };
    OptimizationRecord::new(article_id, payload, metadata)
}

#[tokio::test]
async fn schema_is_created_in_wal_mode() {
    let path = temp_db_path();
    let conn = db::open_db(&path).await.unwrap();

    // Verify schema_version = 1
    let version: i64 = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(db.query_row(
                "SELECT MAX(version) FROM schema_version",
                [],
                |r| r.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(version, 1, "schema_version should be 1");

    // Verify WAL mode
    let journal: String = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(
                db.query_row("PRAGMA journal_mode", [], |r| r.get(0))?,
            )
        })
        .await
        .unwrap();
    assert_eq!(journal, "wal", "journal_mode should be wal");

    // Verify decisions composite PK
    let pk_count: i64 = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(db.query_row(
                "SELECT COUNT(*) FROM pragma_table_info('decisions') WHERE pk > 0",
                [],
                |r| r.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(pk_count, 2, "decisions should have composite PK");

    // Reopening must not re-run the migration.
    drop(conn);
    let conn = db::open_db(&path).await.unwrap();
    let rows: i64 = conn
        .call(|db| {
            Ok::<_, rusqlite::Error>(
                db.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?,
            )
        })
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn decisions_survive_reopen() {
    let path = temp_db_path();
    let decisions = vec![
        Decision {
            issue_id: "issue-3".into(),
            verdict: Verdict::Accepted,
            custom_text: None,
            decided_at: 100,
        },
        Decision {
            issue_id: "issue-1".into(),
            verdict: Verdict::Modified,
            custom_text: Some("春天到了".into()),
            decided_at: 101,
        },
        Decision::pending("issue-2", 102),
    ];

    let conn = db::open_db(&path).await.unwrap();
    db::save_decisions(&conn, 42, &decisions).await.unwrap();
    drop(conn);

    let conn = db::open_db(&path).await.unwrap();
    let loaded = db::load_decisions(&conn, 42).await.unwrap();
    assert_eq!(loaded, decisions, "order and content preserved");
    assert!(db::load_decisions(&conn, 43).await.unwrap().is_empty());

    // A later save replaces the whole set.
    db::save_decisions(&conn, 42, &decisions[..1]).await.unwrap();
    assert_eq!(db::load_decisions(&conn, 42).await.unwrap().len(), 1);
}

#[tokio::test]
async fn parsing_confirmation_keeps_first_time() {
    let path = temp_db_path();
    let conn = db::open_db(&path).await.unwrap();

    assert_eq!(db::parsing_confirmed_at(&conn, 5).await.unwrap(), None);
    db::mark_parsing_confirmed(&conn, 5).await.unwrap();
    let first = db::parsing_confirmed_at(&conn, 5).await.unwrap();
    assert!(first.is_some());

    db::mark_parsing_confirmed(&conn, 5).await.unwrap();
    assert_eq!(db::parsing_confirmed_at(&conn, 5).await.unwrap(), first);
}

#[tokio::test]
async fn records_are_upserted_and_deleted() {
    let path = temp_db_path();
    let conn = db::open_db(&path).await.unwrap();

    assert!(db::get_record(&conn, 42).await.unwrap().is_none());

    db::put_record(&conn, &record(42, 0.03, 5)).await.unwrap();
    db::put_record(&conn, &record(42, 0.05, 8)).await.unwrap();
    let stored = db::get_record(&conn, 42).await.unwrap().unwrap();
    assert_eq!(stored.faqs.len(), 8);
    assert!((stored.metadata.cost_usd - 0.05).abs() < 1e-12);
    assert_eq!(stored.metadata.total_tokens, 3000);
    assert!(!stored.metadata.cached);

    assert!(db::delete_record(&conn, 42).await.unwrap());
    assert!(!db::delete_record(&conn, 42).await.unwrap());
    assert!(db::get_record(&conn, 42).await.unwrap().is_none());
}

#[tokio::test]
async fn events_are_filtered_and_ordered() {
    let path = temp_db_path();
    let conn = db::open_db(&path).await.unwrap();

    let old = OptimizationEvent::cache_read(1, 1_000);
    let mut newer = OptimizationEvent::generation(&record(2, 0.02, 3));
    newer.occurred_at = 3_000;
    let middle = OptimizationEvent::cache_read(3, 2_000);
    for event in [&old, &newer, &middle] {
        db::append_event(&conn, event).await.unwrap();
    }

    let events = db::events_since(&conn, 1_500).await.unwrap();
    assert_eq!(events, vec![middle, newer]);
    assert!(events[1].cost_usd > 0.0);
    assert!(!events[1].cached);
}

#[tokio::test]
async fn counts_beyond_sqlite_range_are_refused() {
    let path = temp_db_path();
    let conn = db::open_db(&path).await.unwrap();

    let mut huge = record(7, 0.01, 3);
    huge.metadata.input_tokens = u64::MAX;
    let err = db::put_record(&conn, &huge).await.unwrap_err();
    assert!(matches!(
        err,
        Error::OutOfRange {
            field: "input_tokens",
            value: u64::MAX
        }
    ));
    assert!(db::get_record(&conn, 7).await.unwrap().is_none());

    let mut event = OptimizationEvent::generation(&record(7, 0.01, 3));
    event.duration_ms = u64::MAX;
    assert!(matches!(
        db::append_event(&conn, &event).await,
        Err(Error::OutOfRange {
            field: "duration_ms",
            ..
        })
    ));
    assert!(db::events_since(&conn, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn negative_stored_counts_are_read_errors() {
    let path = temp_db_path();
    let conn = db::open_db(&path).await.unwrap();
    db::put_record(&conn, &record(8, 0.01, 3)).await.unwrap();

    conn.call(|db| -> rusqlite::Result<usize> {
        db.execute(
            "UPDATE optimization_records SET output_tokens = -1 WHERE article_id = 8",
            [],
        )
    })
    .await
    .unwrap();

    assert!(matches!(
        db::get_record(&conn, 8).await,
        Err(Error::Database(_))
    ));
}
