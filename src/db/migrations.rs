//! Forward-only schema migration framework.
//!
//! Tracks the schema version as `MAX(version)` over the `schema_version`
//! table and applies sequential migrations up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

use crate::db::schema;

/// The schema version that the current crate expects.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Read the current schema version (0 for a fresh database).
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        match next {
            1 => migrate_to_v1(conn)?,
            2 => migrate_v1_to_v2(conn)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }

        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [next])?;
        version = next;
    }

    Ok(())
}

/// Migration v0 → v1: the four core tables and their indexes.
fn migrate_to_v1(conn: &Connection) -> rusqlite::Result<()> {
    schema::init_schema(conn)
}

/// Migration v1 → v2: temporal columns (`session_id`, `parent_id`) plus
/// indexes for session and time-window queries.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    if !column_exists(conn, "memories", "session_id")? {
        conn.execute_batch(
            "ALTER TABLE memories ADD COLUMN session_id TEXT NOT NULL DEFAULT ''",
        )?;
    }
    if !column_exists(conn, "memories", "parent_id")? {
        conn.execute_batch(
            "ALTER TABLE memories ADD COLUMN parent_id INTEGER NOT NULL DEFAULT 0",
        )?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);
         CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);",
    )?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
