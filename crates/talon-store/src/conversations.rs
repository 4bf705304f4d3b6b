//! Conversation log: append-only per chat, periodically pruned.

use rusqlite::params;

use crate::error::Result;
use crate::types::{ConversationEntry, Role};
use crate::Store;

impl Store {
    pub fn append_conversation(
        &self,
        chat_id: i64,
        session_id: Option<&str>,
        role: Role,
        content: &str,
        now: i64,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO conversations (chat_id, session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chat_id, session_id, role.to_string(), content, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The last `limit` rows for a chat, oldest first.
    pub fn recent_conversations(&self, chat_id: i64, limit: usize) -> Result<Vec<ConversationEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, session_id, role, content, created_at
             FROM conversations
             WHERE chat_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], row_to_entry)?;
        let mut entries: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        entries.reverse();
        Ok(entries)
    }

    pub fn conversation_count(&self, chat_id: i64) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM conversations WHERE chat_id = ?1",
            [chat_id],
            |r| r.get(0),
        )?)
    }

    /// Trim every chat's log to its newest `keep` rows. Returns total removed.
    pub fn prune_conversations(&self, keep: usize) -> Result<usize> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut removed = 0usize;
        {
            let chat_ids: Vec<i64> = {
                let mut stmt = tx.prepare("SELECT DISTINCT chat_id FROM conversations")?;
                let ids = stmt
                    .query_map([], |r| r.get(0))?
                    .filter_map(|r| r.ok())
                    .collect();
                ids
            };
            for chat_id in chat_ids {
                removed += tx.execute(
                    "DELETE FROM conversations WHERE chat_id = ?1 AND id NOT IN (
                         SELECT id FROM conversations WHERE chat_id = ?1
                         ORDER BY id DESC LIMIT ?2
                     )",
                    params![chat_id, keep as i64],
                )?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationEntry> {
    let role: String = row.get(3)?;
    Ok(ConversationEntry {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        session_id: row.get(2)?,
        role: role.parse().unwrap_or(Role::User),
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}
