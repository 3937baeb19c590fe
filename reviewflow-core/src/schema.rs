/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every DB open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the full v1 schema.
///
/// Contains four tables:
/// - `article_status`: worklist status flags per article (parsing confirmation).
/// - `decisions`: proofreading verdicts, one row per (article, issue). `position`
///   preserves insertion order so restored stores list issues as they were added.
/// - `optimization_records`: the current title/SEO/FAQ bundle per article. The
///   payload is a JSON document; accounting columns are kept separate so they can
///   be queried without parsing it.
/// - `optimization_events`: append-only log of every generation and cache read.
///
/// All tables use `STRICT` mode for type enforcement.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS article_status (
        article_id          INTEGER PRIMARY KEY,
        parsing_confirmed_at INTEGER,
        updated_at          INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS decisions (
        article_id  INTEGER NOT NULL,
        issue_id    TEXT    NOT NULL,
        position    INTEGER NOT NULL,
        verdict     TEXT    NOT NULL
                            CHECK(verdict IN ('pending','accepted','rejected','modified')),
        custom_text TEXT,
        decided_at  INTEGER NOT NULL,
        PRIMARY KEY (article_id, issue_id)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS optimization_records (
        article_id    INTEGER PRIMARY KEY,
        payload       TEXT    NOT NULL,
        cost_usd      REAL    NOT NULL,
        input_tokens  INTEGER NOT NULL,
        output_tokens INTEGER NOT NULL,
        duration_ms   INTEGER NOT NULL,
        generated_at  INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS optimization_events (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        article_id   INTEGER NOT NULL,
        cached       INTEGER NOT NULL,
        cost_usd     REAL    NOT NULL,
        total_tokens INTEGER NOT NULL,
        duration_ms  INTEGER NOT NULL,
        occurred_at  INTEGER NOT NULL
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_optimization_events_occurred_at
        ON optimization_events(occurred_at);
";

/// Runs forward-only schema migration to migrate the DB to the latest version.
///
/// This function is idempotent: safe to call on every startup regardless of
/// whether the schema has already been applied.
///
/// # Process
///
/// 1. Creates the `schema_version` table if it does not exist.
/// 2. Reads the current version (`0` if the table is empty).
/// 3. If the version is below 1, applies `SCHEMA_V1_SQL` inside a
///    `BEGIN IMMEDIATE` transaction and records `version = 1`.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
    }

    Ok(())
}
