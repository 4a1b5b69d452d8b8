//! SQLite schema for the checkpoint backend

/// Bumped when the table layout changes
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the checkpoint database
pub const SCHEMA_SQL: &str = r#"
-- One row per job key; payload is the full checkpoint document
CREATE TABLE IF NOT EXISTS checkpoints (
    key TEXT PRIMARY KEY,
    cursor INTEGER NOT NULL,
    payload TEXT NOT NULL,
    config_hash TEXT,
    updated_at TEXT
);

-- Records removed by the operator, kept for inspection
CREATE TABLE IF NOT EXISTS discarded_checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    payload TEXT NOT NULL,
    discarded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_discarded_key ON discarded_checkpoints(key);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
