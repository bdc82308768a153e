//! SQL DDL for the core tables.
//!
//! Defines `memories`, `vectors`, `waypoints`, `associations`, and the
//! `schema_version` tracking table. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization.

use rusqlite::Connection;

/// Version-1 schema: the four data tables plus indexes.
const SCHEMA_V1_SQL: &str = r#"
-- Core memory storage
CREATE TABLE IF NOT EXISTS memories (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    content          TEXT    NOT NULL,
    sector           TEXT    NOT NULL DEFAULT 'semantic',
    salience         REAL    NOT NULL DEFAULT 0.5,
    decay_score      REAL    NOT NULL DEFAULT 0.5,
    last_accessed_at TEXT    NOT NULL DEFAULT (datetime('now')),
    access_count     INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT    NOT NULL DEFAULT (datetime('now')),
    summary          TEXT    NOT NULL DEFAULT '',
    user_id          TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_user_id ON memories(user_id);
CREATE INDEX IF NOT EXISTS idx_memories_sector  ON memories(sector);

-- Embedding blobs, one per memory
CREATE TABLE IF NOT EXISTS vectors (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id       INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    sector          TEXT    NOT NULL,
    vector          BLOB    NOT NULL,
    embedding_model TEXT    NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_vectors_memory_id ON vectors(memory_id);

-- Entity nodes for associative recall
CREATE TABLE IF NOT EXISTS waypoints (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_text TEXT NOT NULL UNIQUE,
    entity_type TEXT NOT NULL DEFAULT 'unknown'
);

CREATE INDEX IF NOT EXISTS idx_waypoints_entity ON waypoints(entity_text);

-- Weighted memory → waypoint edges
CREATE TABLE IF NOT EXISTS associations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id   INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    waypoint_id INTEGER NOT NULL REFERENCES waypoints(id) ON DELETE CASCADE,
    weight      REAL    NOT NULL DEFAULT 0.5,
    UNIQUE(memory_id, waypoint_id)
);

CREATE INDEX IF NOT EXISTS idx_assoc_memory   ON associations(memory_id);
CREATE INDEX IF NOT EXISTS idx_assoc_waypoint ON associations(waypoint_id);
"#;

/// Create the schema_version table and the v1 tables. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;
    conn.execute_batch(SCHEMA_V1_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["memories", "vectors", "waypoints", "associations", "schema_version"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }
}
