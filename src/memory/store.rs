//! Durable persistence for memories, vectors, waypoints, and associations.
//!
//! [`Store`] wraps a single SQLite connection behind a mutex — writes are
//! serialized at the connection level, which is plenty at the target scale
//! of a few hundred memories per user. All timestamps are UTC strings in
//! `YYYY-MM-DD HH:MM:SS` form, written by SQLite's `datetime('now')`.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use crate::db;
use crate::memory::types::{DecayRates, Memory, Sector, DEFAULT_LAMBDA};
use crate::memory::{decode_vector, encode_vector};
use crate::scoring::decay_factor;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MEMORY_COLS: &str = "m.id, m.content, m.sector, m.salience, m.decay_score, \
     m.last_accessed_at, m.access_count, m.created_at, m.summary, m.user_id, \
     m.session_id, m.parent_id";

/// A memory paired with its embedding, if one was stored.
#[derive(Debug, Clone)]
pub struct MemoryWithVector {
    pub memory: Memory,
    pub vector: Option<Vec<f32>>,
}

/// A memory reached through a waypoint, carrying the edge weight.
#[derive(Debug, Clone)]
pub struct LinkedMemory {
    pub memory: Memory,
    pub vector: Option<Vec<f32>>,
    pub weight: f64,
}

/// SQLite-backed persistence for the memory engine.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = db::open_database(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an ephemeral in-memory store. Used by tests and throwaway engines.
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Memory CRUD ─────────────────────────────────────────────────────────

    /// Insert a new memory row and return its assigned id.
    ///
    /// `decay_score` starts equal to `salience`; timestamps come from the
    /// schema defaults (`datetime('now')`).
    pub fn insert_memory(&self, m: &Memory) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memories (content, sector, salience, decay_score, summary, user_id, session_id, parent_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                m.content,
                m.sector.as_str(),
                m.salience,
                m.salience,
                m.summary,
                m.user_id,
                m.session_id,
                m.parent_id,
            ],
        )
        .context("insert memory")?;
        Ok(conn.last_insert_rowid())
    }

    /// Store an embedding blob linked to a memory. Fails if the memory does
    /// not exist (foreign keys are on).
    pub fn insert_vector(
        &self,
        memory_id: i64,
        sector: Sector,
        vector: &[f32],
        embedding_model: &str,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO vectors (memory_id, sector, vector, embedding_model) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![memory_id, sector.as_str(), encode_vector(vector), embedding_model],
            )
            .context("insert vector")?;
        Ok(())
    }

    /// Load all memories for a user, newest first, with their vectors.
    /// Unembedded memories appear with `vector: None` (outer join).
    pub fn get_memories_with_vectors(&self, user_id: &str) -> Result<Vec<MemoryWithVector>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLS}, v.vector \
             FROM memories m \
             LEFT JOIN vectors v ON v.memory_id = m.id \
             WHERE m.user_id = ?1 \
             ORDER BY m.created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let memory = memory_from_row(row)?;
                let blob: Option<Vec<u8>> = row.get(12)?;
                Ok(MemoryWithVector {
                    memory,
                    vector: blob.map(|b| decode_vector(&b)),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update a memory's sector and its vector row's denormalized sector in
    /// one transaction, so the two never diverge.
    pub fn update_memory_sector(&self, memory_id: i64, sector: Sector) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE memories SET sector = ?1 WHERE id = ?2",
            params![sector.as_str(), memory_id],
        )?;
        tx.execute(
            "UPDATE vectors SET sector = ?1 WHERE memory_id = ?2",
            params![sector.as_str(), memory_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Temporal queries ────────────────────────────────────────────────────

    /// All memories for a session, oldest first.
    pub fn get_session_memories(&self, session_id: &str) -> Result<Vec<Memory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLS} FROM memories m \
             WHERE m.session_id = ?1 ORDER BY m.created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![session_id], memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Memories for a user created inside `[after, before]`, newest first.
    pub fn get_memories_in_time_window(
        &self,
        user_id: &str,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLS} FROM memories m \
             WHERE m.user_id = ?1 AND m.created_at >= ?2 AND m.created_at <= ?3 \
             ORDER BY m.created_at DESC"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    after.format(TS_FORMAT).to_string(),
                    before.format(TS_FORMAT).to_string()
                ],
                memory_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The `limit` most recent memories for a user, optionally restricted to
    /// a set of sectors (empty = all).
    pub fn get_recent_memories(
        &self,
        user_id: &str,
        limit: usize,
        sectors: &[Sector],
    ) -> Result<Vec<Memory>> {
        let mut sql = format!("SELECT {MEMORY_COLS} FROM memories m WHERE m.user_id = ?1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user_id.to_string())];

        if !sectors.is_empty() {
            let placeholders: Vec<String> =
                (0..sectors.len()).map(|i| format!("?{}", i + 2)).collect();
            sql.push_str(&format!(" AND m.sector IN ({})", placeholders.join(",")));
            for sector in sectors {
                args.push(Box::new(sector.as_str().to_string()));
            }
        }

        sql.push_str(&format!(" ORDER BY m.created_at DESC LIMIT ?{}", args.len() + 1));
        args.push(Box::new(limit as i64));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt
            .query_map(params.as_slice(), memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The most recent non-empty session id for a user, or `None`.
    pub fn get_last_session_id(&self, user_id: &str) -> Result<Option<String>> {
        let id = self
            .conn()
            .query_row(
                "SELECT session_id FROM memories \
                 WHERE user_id = ?1 AND session_id != '' \
                 ORDER BY created_at DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// All distinct user ids with stored memories.
    pub fn get_active_user_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM memories")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ── Waypoint graph ──────────────────────────────────────────────────────

    /// Insert or find a waypoint by entity text; returns its id. On conflict
    /// the entity type is overwritten with the newer value.
    pub fn upsert_waypoint(&self, text: &str, entity_type: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO waypoints (entity_text, entity_type) VALUES (?1, ?2) \
             ON CONFLICT(entity_text) DO UPDATE SET entity_type = excluded.entity_type",
            params![text, entity_type],
        )?;
        let id = conn.query_row(
            "SELECT id FROM waypoints WHERE entity_text = ?1",
            params![text],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Link a memory to a waypoint. Re-linking keeps the stronger weight.
    pub fn insert_association(&self, memory_id: i64, waypoint_id: i64, weight: f64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO associations (memory_id, waypoint_id, weight) VALUES (?1, ?2, ?3) \
             ON CONFLICT(memory_id, waypoint_id) DO UPDATE SET weight = MAX(weight, excluded.weight)",
            params![memory_id, waypoint_id, weight],
        )?;
        Ok(())
    }

    /// Waypoint ids linked to a memory.
    pub fn get_associated_waypoint_ids(&self, memory_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT waypoint_id FROM associations WHERE memory_id = ?1")?;
        let ids = stmt
            .query_map(params![memory_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Memories of `user_id` linked to a waypoint, excluding the given ids,
    /// each with its vector and the association weight.
    pub fn get_memories_by_waypoint(
        &self,
        waypoint_id: i64,
        user_id: &str,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<LinkedMemory>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLS}, v.vector, a.weight \
             FROM associations a \
             JOIN memories m ON m.id = a.memory_id \
             LEFT JOIN vectors v ON v.memory_id = m.id \
             WHERE a.waypoint_id = ?1 AND m.user_id = ?2"
        ))?;
        let rows = stmt
            .query_map(params![waypoint_id, user_id], |row| {
                let memory = memory_from_row(row)?;
                let blob: Option<Vec<u8>> = row.get(12)?;
                let weight: f64 = row.get(13)?;
                Ok(LinkedMemory {
                    memory,
                    vector: blob.map(|b| decode_vector(&b)),
                    weight,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().filter(|lm| !exclude.contains(&lm.memory.id)).collect())
    }

    // ── Reinforcement ───────────────────────────────────────────────────────

    /// Boost a memory's salience and decay score (clamped at 1.0), stamp the
    /// access time, and bump the access counter.
    pub fn reinforce_salience(&self, memory_id: i64, boost: f64) -> Result<()> {
        self.conn().execute(
            "UPDATE memories \
             SET salience = MIN(salience + ?1, 1.0), \
                 decay_score = MIN(decay_score + ?1, 1.0), \
                 last_accessed_at = datetime('now'), \
                 access_count = access_count + 1 \
             WHERE id = ?2",
            params![boost, memory_id],
        )?;
        Ok(())
    }

    // ── Decay sweep ─────────────────────────────────────────────────────────

    /// Apply exponential decay to every memory and prune the dead ones, all
    /// in a single transaction. Returns `(updated, deleted)` counts.
    ///
    /// Memories falling below `min_score` are deleted (cascading to vectors
    /// and associations); every surviving association weight is multiplied by
    /// 0.995 and edges below 0.05 are removed; waypoints left without a
    /// referring association are dropped.
    pub fn run_decay_sweep(
        &self,
        min_score: f64,
        rates: &DecayRates,
    ) -> Result<(usize, usize)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        struct DecayRow {
            id: i64,
            score: f64,
        }
        let mut updates: Vec<DecayRow> = Vec::new();
        let mut to_delete: Vec<i64> = Vec::new();

        {
            let mut stmt =
                tx.prepare("SELECT id, sector, salience, last_accessed_at FROM memories")?;
            let mut rows = stmt.query([])?;
            let now = Utc::now();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let sector_str: String = row.get(1)?;
                let salience: f64 = row.get(2)?;
                let last_accessed: String = row.get(3)?;

                let accessed = parse_timestamp(&last_accessed);
                let days = now.signed_duration_since(accessed).num_milliseconds() as f64
                    / 86_400_000.0;
                let lambda = Sector::from_str(&sector_str)
                    .map(|s| rates.lambda(s))
                    .unwrap_or(DEFAULT_LAMBDA);

                let new_score = salience * decay_factor(lambda, days, salience);
                if new_score < min_score {
                    to_delete.push(id);
                } else {
                    updates.push(DecayRow { id, score: new_score });
                }
            }
        }

        {
            let mut stmt = tx.prepare("UPDATE memories SET decay_score = ?1 WHERE id = ?2")?;
            for u in &updates {
                stmt.execute(params![u.score, u.id])?;
            }
        }

        for id in &to_delete {
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }

        tx.execute("UPDATE associations SET weight = weight * 0.995", [])?;
        tx.execute("DELETE FROM associations WHERE weight < 0.05", [])?;
        tx.execute(
            "DELETE FROM waypoints WHERE id NOT IN (SELECT DISTINCT waypoint_id FROM associations)",
            [],
        )?;

        tx.commit()?;
        Ok((updates.len(), to_delete.len()))
    }

    // ── Memory cap ──────────────────────────────────────────────────────────

    /// If a user exceeds `max_count` memories, delete the excess rows with
    /// the lowest decay score, oldest first. Runs after insert, so a freshly
    /// stored low-salience memory can itself be the one evicted.
    pub fn enforce_memory_limit(&self, user_id: &str, max_count: usize) -> Result<()> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        if count as usize <= max_count {
            return Ok(());
        }

        let excess = count as usize - max_count;
        conn.execute(
            "DELETE FROM memories WHERE id IN ( \
                SELECT id FROM memories \
                WHERE user_id = ?1 \
                ORDER BY decay_score ASC, created_at ASC \
                LIMIT ?2 \
             )",
            params![user_id, excess as i64],
        )?;
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Checkpoint the WAL so everything written so far is in the main file.
    pub fn flush(&self) -> Result<()> {
        let conn = self.conn();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("wal checkpoint")?;
        Ok(())
    }
}

/// Scan a memory from a row selected with [`MEMORY_COLS`].
fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let sector_str: String = row.get(2)?;
    let last_accessed: String = row.get(5)?;
    let created: String = row.get(7)?;
    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        sector: Sector::from_str(&sector_str).unwrap_or(Sector::Semantic),
        salience: row.get(3)?,
        decay_score: row.get(4)?,
        last_accessed_at: parse_timestamp(&last_accessed),
        access_count: row.get(6)?,
        created_at: parse_timestamp(&created),
        summary: row.get(8)?,
        user_id: row.get(9)?,
        session_id: row.get(10)?,
        parent_id: row.get(11)?,
    })
}

/// Parse a stored `YYYY-MM-DD HH:MM:SS` UTC timestamp. Unparseable strings
/// read as the epoch rather than failing the whole scan.
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::DecayRates;

    fn test_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn sample_memory(content: &str, sector: Sector, salience: f64, user_id: &str) -> Memory {
        Memory {
            id: 0,
            content: content.to_string(),
            sector,
            salience,
            decay_score: salience,
            last_accessed_at: Utc::now(),
            access_count: 0,
            created_at: Utc::now(),
            summary: content.chars().take(40).collect(),
            user_id: user_id.to_string(),
            session_id: String::new(),
            parent_id: 0,
        }
    }

    /// Backdate both timestamps of a memory by `days`.
    fn backdate(store: &Store, id: i64, days: i64) {
        let then = Utc::now() - chrono::Duration::days(days);
        let ts = then.format(TS_FORMAT).to_string();
        store
            .conn()
            .execute(
                "UPDATE memories SET last_accessed_at = ?1, created_at = ?1 WHERE id = ?2",
                params![ts, id],
            )
            .unwrap();
    }

    fn spike(dim: usize, at: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[at] = 1.0;
        v
    }

    #[test]
    fn insert_memory_initializes_decay_score_to_salience() {
        let store = test_store();
        let id = store
            .insert_memory(&sample_memory("likes jazz", Sector::Semantic, 0.8, "u"))
            .unwrap();
        let (salience, decay): (f64, f64) = store
            .conn()
            .query_row(
                "SELECT salience, decay_score FROM memories WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(salience, 0.8);
        assert_eq!(decay, 0.8);
    }

    #[test]
    fn vector_codec_round_trips() {
        let v = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE, 1e30];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
        assert!(decode_vector(&encode_vector(&[])).is_empty());
    }

    #[test]
    fn insert_vector_requires_owning_memory() {
        let store = test_store();
        let result = store.insert_vector(12345, Sector::Semantic, &spike(8, 0), "");
        assert!(result.is_err());
    }

    #[test]
    fn deleting_memory_cascades_to_vector_and_associations() {
        let store = test_store();
        let id = store
            .insert_memory(&sample_memory("cascades", Sector::Semantic, 0.5, "u"))
            .unwrap();
        store.insert_vector(id, Sector::Semantic, &spike(8, 1), "").unwrap();
        let wp = store.upsert_waypoint("Tokyo", "place").unwrap();
        store.insert_association(id, wp, 0.5).unwrap();

        store
            .conn()
            .execute("DELETE FROM memories WHERE id = ?1", params![id])
            .unwrap();

        let vectors: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))
            .unwrap();
        let assocs: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM associations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(vectors, 0);
        assert_eq!(assocs, 0);
    }

    #[test]
    fn upsert_waypoint_is_idempotent_and_overwrites_type() {
        let store = test_store();
        let a = store.upsert_waypoint("Nebula Fizz", "topic").unwrap();
        let b = store.upsert_waypoint("Nebula Fizz", "drink").unwrap();
        assert_eq!(a, b);

        let entity_type: String = store
            .conn()
            .query_row(
                "SELECT entity_type FROM waypoints WHERE id = ?1",
                params![a],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(entity_type, "drink");
    }

    #[test]
    fn association_conflict_keeps_max_weight() {
        let store = test_store();
        let mem = store
            .insert_memory(&sample_memory("edges", Sector::Semantic, 0.5, "u"))
            .unwrap();
        let wp = store.upsert_waypoint("Alex", "person").unwrap();

        store.insert_association(mem, wp, 0.5).unwrap();
        store.insert_association(mem, wp, 0.9).unwrap();
        store.insert_association(mem, wp, 0.3).unwrap();

        let (count, weight): (i64, f64) = store
            .conn()
            .query_row(
                "SELECT COUNT(*), MAX(weight) FROM associations WHERE memory_id = ?1",
                params![mem],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(weight, 0.9);
    }

    #[test]
    fn reinforce_clamps_at_one_and_counts_accesses() {
        let store = test_store();
        let id = store
            .insert_memory(&sample_memory("boosted", Sector::Semantic, 0.95, "u"))
            .unwrap();

        store.reinforce_salience(id, 0.15).unwrap();
        store.reinforce_salience(id, 0.15).unwrap();

        let (salience, decay, count): (f64, f64, i64) = store
            .conn()
            .query_row(
                "SELECT salience, decay_score, access_count FROM memories WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(salience, 1.0);
        assert_eq!(decay, 1.0);
        assert_eq!(count, 2);
    }

    #[test]
    fn unembedded_memories_surface_with_null_vector() {
        let store = test_store();
        let with_vec = store
            .insert_memory(&sample_memory("embedded", Sector::Semantic, 0.5, "u"))
            .unwrap();
        store.insert_vector(with_vec, Sector::Semantic, &spike(8, 0), "").unwrap();
        store
            .insert_memory(&sample_memory("bare", Sector::Semantic, 0.5, "u"))
            .unwrap();

        let all = store.get_memories_with_vectors("u").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|m| m.vector.is_some()).count(), 1);
        assert_eq!(all.iter().filter(|m| m.vector.is_none()).count(), 1);
    }

    #[test]
    fn update_memory_sector_keeps_vector_row_in_sync() {
        let store = test_store();
        let id = store
            .insert_memory(&sample_memory("reclassified", Sector::Semantic, 0.5, "u"))
            .unwrap();
        store.insert_vector(id, Sector::Semantic, &spike(8, 2), "").unwrap();

        store.update_memory_sector(id, Sector::Episodic).unwrap();

        let mem_sector: String = store
            .conn()
            .query_row("SELECT sector FROM memories WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        let vec_sector: String = store
            .conn()
            .query_row(
                "SELECT sector FROM vectors WHERE memory_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(mem_sector, "episodic");
        assert_eq!(vec_sector, "episodic");
    }

    #[test]
    fn decay_sweep_prunes_weak_memories_and_keeps_strong() {
        let store = test_store();
        let fading = store
            .insert_memory(&sample_memory("fading", Sector::Semantic, 0.001, "u"))
            .unwrap();
        let strong = store
            .insert_memory(&sample_memory("strong", Sector::Semantic, 0.9, "u"))
            .unwrap();
        backdate(&store, fading, 30);
        backdate(&store, strong, 30);

        let (updated, deleted) = store.run_decay_sweep(0.01, &DecayRates::default()).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(deleted, 1);

        let remaining = store.get_memories_with_vectors("u").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].memory.id, strong);
        assert!(remaining[0].memory.decay_score < 0.9);
    }

    #[test]
    fn decay_sweep_prunes_weak_edges_and_orphan_waypoints() {
        let store = test_store();
        let mem = store
            .insert_memory(&sample_memory("graph", Sector::Semantic, 0.9, "u"))
            .unwrap();
        let strong_wp = store.upsert_waypoint("Harajuku Station", "place").unwrap();
        let weak_wp = store.upsert_waypoint("passing mention", "topic").unwrap();
        store.insert_association(mem, strong_wp, 0.5).unwrap();
        // Just above the pruning floor: one 0.995 pass drops it below 0.05.
        store.insert_association(mem, weak_wp, 0.0502).unwrap();

        store.run_decay_sweep(0.01, &DecayRates::default()).unwrap();

        let waypoints: Vec<String> = {
            let conn = store.conn();
            let mut stmt = conn.prepare("SELECT entity_text FROM waypoints").unwrap();
            let rows = stmt
                .query_map([], |r| r.get(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            rows
        };
        assert_eq!(waypoints, vec!["Harajuku Station".to_string()]);
    }

    #[test]
    fn decay_sweep_is_idempotent_per_tick() {
        let store = test_store();
        let id = store
            .insert_memory(&sample_memory("steady", Sector::Episodic, 0.7, "u"))
            .unwrap();
        backdate(&store, id, 10);

        let (_, deleted_first) = store.run_decay_sweep(0.01, &DecayRates::default()).unwrap();
        let (_, deleted_second) = store.run_decay_sweep(0.01, &DecayRates::default()).unwrap();
        assert_eq!(deleted_first, 0);
        assert_eq!(deleted_second, 0);

        // decay_score is recomputed from salience each sweep, so a second
        // pass with no accesses in between lands on the same value.
        let survivors = store.get_memories_with_vectors("u").unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn enforce_limit_evicts_lowest_decay_oldest_first() {
        let store = test_store();
        let doomed = store
            .insert_memory(&sample_memory("old and weak", Sector::Semantic, 0.1, "u"))
            .unwrap();
        backdate(&store, doomed, 5);
        let tied_newer = store
            .insert_memory(&sample_memory("new but weak", Sector::Semantic, 0.1, "u"))
            .unwrap();
        let keeper = store
            .insert_memory(&sample_memory("strong", Sector::Semantic, 0.9, "u"))
            .unwrap();

        store.enforce_memory_limit("u", 2).unwrap();

        let ids: Vec<i64> = store
            .get_memories_with_vectors("u")
            .unwrap()
            .into_iter()
            .map(|m| m.memory.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&keeper));
        assert!(ids.contains(&tied_newer));
        assert!(!ids.contains(&doomed));
    }

    #[test]
    fn enforce_limit_is_a_noop_under_cap() {
        let store = test_store();
        store
            .insert_memory(&sample_memory("only one", Sector::Semantic, 0.5, "u"))
            .unwrap();
        store.enforce_memory_limit("u", 10).unwrap();
        assert_eq!(store.get_memories_with_vectors("u").unwrap().len(), 1);
    }

    #[test]
    fn waypoint_lookup_excludes_seed_ids_and_carries_weight() {
        let store = test_store();
        let seed = store
            .insert_memory(&sample_memory("seed", Sector::Semantic, 0.5, "u"))
            .unwrap();
        let linked = store
            .insert_memory(&sample_memory("linked", Sector::Semantic, 0.5, "u"))
            .unwrap();
        let other_user = store
            .insert_memory(&sample_memory("foreign", Sector::Semantic, 0.5, "someone-else"))
            .unwrap();
        let wp = store.upsert_waypoint("Cornelius", "music_artist").unwrap();
        store.insert_association(seed, wp, 0.5).unwrap();
        store.insert_association(linked, wp, 0.7).unwrap();
        store.insert_association(other_user, wp, 0.5).unwrap();

        let exclude: HashSet<i64> = [seed].into_iter().collect();
        let found = store.get_memories_by_waypoint(wp, "u", &exclude).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].memory.id, linked);
        assert_eq!(found[0].weight, 0.7);
    }

    #[test]
    fn timestamp_parse_tolerates_garbage() {
        assert_eq!(parse_timestamp("not a time"), DateTime::<Utc>::UNIX_EPOCH);
        let parsed = parse_timestamp("2026-08-02 12:30:00");
        assert_eq!(parsed.format(TS_FORMAT).to_string(), "2026-08-02 12:30:00");
    }
}
