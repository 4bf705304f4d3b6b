//! Memory rows: insert, search, touch, decay, pruning.

use rusqlite::params;

use crate::error::Result;
use crate::fts::sanitize_query;
use crate::types::{MemoryEntry, MemorySector};
use crate::Store;

/// Hourly multiplier applied per hour since last access.
pub const DECAY_FACTOR: f64 = 0.98;
/// Rows decaying below this are deleted by the sweep.
pub const MIN_SALIENCE: f64 = 0.1;
/// Touches saturate here.
pub const MAX_SALIENCE: f64 = 5.0;
/// Rows younger than this are exempt from decay.
const DECAY_MIN_AGE_SECS: i64 = 24 * 3600;

const MEMORY_COLS: &str =
    "id, chat_id, topic_key, content, sector, salience, created_at, accessed_at";

impl Store {
    /// Insert a memory with default salience, stamped `now`.
    pub fn insert_memory(
        &self,
        chat_id: i64,
        topic_key: Option<&str>,
        sector: MemorySector,
        content: &str,
        now: i64,
    ) -> Result<i64> {
        self.insert_memory_at(chat_id, topic_key, sector, content, now, now)
    }

    /// Insert with explicit timestamps (backfill and decay tests).
    pub fn insert_memory_at(
        &self,
        chat_id: i64,
        topic_key: Option<&str>,
        sector: MemorySector,
        content: &str,
        created_at: i64,
        accessed_at: i64,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memories (chat_id, topic_key, content, sector, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![chat_id, topic_key, content, sector.to_string(), created_at, accessed_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn delete_memory(&self, id: i64) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM memories WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    /// Replace a row's content; the FTS index follows via trigger.
    pub fn update_memory_content(&self, id: i64, content: &str) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE memories SET content = ?1 WHERE id = ?2",
            params![content, id],
        )?;
        Ok(n > 0)
    }

    /// Rank-ordered full-text hits for a chat. A query with no usable tokens
    /// returns empty without touching the index.
    pub fn search_memories(
        &self,
        chat_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let Some(fts_query) = sanitize_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.chat_id, m.topic_key, m.content, m.sector,
                    m.salience, m.created_at, m.accessed_at
             FROM memories m
             JOIN memories_fts f ON m.id = f.rowid
             WHERE m.chat_id = ?1 AND memories_fts MATCH ?2
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![chat_id, fts_query, limit as i64],
            row_to_memory,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recently accessed rows, newest first.
    pub fn recent_memories(&self, chat_id: i64, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLS} FROM memories
             WHERE chat_id = ?1
             ORDER BY accessed_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![chat_id, limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Bump salience (saturating at [`MAX_SALIENCE`]) and refresh `accessed_at`.
    pub fn touch_memory(&self, id: i64, delta: f64, now: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE memories
             SET salience = MIN(salience + ?1, ?2), accessed_at = ?3
             WHERE id = ?4",
            params![delta, MAX_SALIENCE, now, id],
        )?;
        Ok(())
    }

    pub fn memory_count(&self, chat_id: i64) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM memories WHERE chat_id = ?1",
            [chat_id],
            |r| r.get(0),
        )?)
    }

    /// Delete rows beyond `max`, least salient and longest-unaccessed first.
    /// Returns how many were removed.
    pub fn prune_memories(&self, chat_id: i64, max: usize) -> Result<usize> {
        let total = self.memory_count(chat_id)?;
        let excess = total - max as i64;
        if excess <= 0 {
            return Ok(0);
        }
        let n = self.conn().execute(
            "DELETE FROM memories WHERE id IN (
                 SELECT id FROM memories WHERE chat_id = ?1
                 ORDER BY salience ASC, accessed_at ASC, id ASC
                 LIMIT ?2
             )",
            params![chat_id, excess],
        )?;
        Ok(n)
    }

    /// Wipe a chat's memory entirely. Returns the removed row count.
    pub fn delete_all_memories(&self, chat_id: i64) -> Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM memories WHERE chat_id = ?1", [chat_id])?)
    }

    /// Time-decay sweep over rows older than a day.
    ///
    /// `new = salience * DECAY_FACTOR ^ hours_since_last_access`; rows falling
    /// below [`MIN_SALIENCE`] are deleted, measurable drops are written back.
    /// Everything happens in one transaction. Returns `(decayed, deleted)`.
    pub fn decay_memories(&self, now: i64) -> Result<(usize, usize)> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut decayed = 0usize;
        let mut deleted = 0usize;
        {
            let mut stmt = tx.prepare(
                "SELECT id, salience, accessed_at FROM memories WHERE created_at < ?1",
            )?;
            let rows: Vec<(i64, f64, i64)> = stmt
                .query_map([now - DECAY_MIN_AGE_SECS], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?
                .filter_map(|r| r.ok())
                .collect();

            for (id, salience, accessed_at) in rows {
                let hours = (now - accessed_at).max(0) as f64 / 3600.0;
                let new = salience * DECAY_FACTOR.powf(hours);
                if new < MIN_SALIENCE {
                    tx.execute("DELETE FROM memories WHERE id = ?1", [id])?;
                    deleted += 1;
                } else if new < salience - 0.001 {
                    tx.execute(
                        "UPDATE memories SET salience = ?1 WHERE id = ?2",
                        params![new, id],
                    )?;
                    decayed += 1;
                }
            }
        }
        tx.commit()?;
        Ok((decayed, deleted))
    }
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let sector: String = row.get(4)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        topic_key: row.get(2)?,
        content: row.get(3)?,
        sector: sector.parse().unwrap_or(MemorySector::Episodic),
        salience: row.get(5)?,
        created_at: row.get(6)?,
        accessed_at: row.get(7)?,
    })
}
