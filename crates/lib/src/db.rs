//! Database bootstrap: opens the turso database, enables WAL and foreign
//! keys, and creates the schema idempotently.

use turso::Database;

use crate::errors::StoreError;

const TABLE_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        id         TEXT PRIMARY KEY,
        name       TEXT NOT NULL,
        type       TEXT NOT NULL,
        status     TEXT NOT NULL,
        error      TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS chunks (
        id            TEXT PRIMARY KEY,
        document_id   TEXT NOT NULL,
        document_name TEXT NOT NULL,
        chunk_index   INTEGER NOT NULL,
        chunk_text    TEXT NOT NULL,
        embedding     BLOB NOT NULL,
        image_url     TEXT,
        product_id    TEXT,
        created_at    DATETIME DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )",
    "CREATE TABLE IF NOT EXISTS pending_questions (
        id          TEXT PRIMARY KEY,
        question    TEXT NOT NULL,
        user_id     TEXT NOT NULL,
        status      TEXT NOT NULL,
        answer      TEXT,
        llm_answer  TEXT,
        created_at  DATETIME DEFAULT CURRENT_TIMESTAMP,
        answered_at DATETIME
    )",
];

/// Opens (or creates) the database at `db_path` and prepares it for use.
/// `":memory:"` yields an isolated in-memory database.
pub async fn init_db(db_path: &str) -> Result<Database, StoreError> {
    let db = turso::Builder::new_local(db_path).build().await?;

    let conn = db.connect()?;
    // PRAGMAs that return a value must go through `query`.
    conn.query("PRAGMA journal_mode=WAL;", ()).await?;
    conn.execute("PRAGMA foreign_keys=ON;", ()).await?;

    for ddl in TABLE_DDL {
        conn.execute(ddl, ()).await?;
    }

    Ok(db)
}

/// Generates an opaque 128-bit hex identifier.
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
