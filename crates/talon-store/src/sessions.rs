//! Session binding: one resume handle per chat.

use crate::error::Result;
use crate::Store;

impl Store {
    /// The stored resume handle for a chat, if any.
    pub fn get_session(&self, chat_id: i64) -> Result<Option<String>> {
        let conn = self.conn();
        match conn.query_row(
            "SELECT session_id FROM sessions WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the chat's resume handle. A refused handle is simply overwritten
    /// by the next surfaced id through this same call.
    pub fn set_session(&self, chat_id: i64, session_id: &str, now: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (chat_id, session_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET session_id = ?2, updated_at = ?3",
            rusqlite::params![chat_id, session_id, now],
        )?;
        Ok(())
    }

    /// Drop the binding. Returns whether a row existed.
    pub fn clear_session(&self, chat_id: i64) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM sessions WHERE chat_id = ?1", [chat_id])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;

    #[test]
    fn set_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.set_session(7, "sess-a", 100).unwrap();
        assert_eq!(store.get_session(7).unwrap().as_deref(), Some("sess-a"));
    }

    #[test]
    fn second_set_overwrites_without_duplicating() {
        let store = Store::open_in_memory().unwrap();
        store.set_session(7, "sess-a", 100).unwrap();
        store.set_session(7, "sess-b", 200).unwrap();
        assert_eq!(store.get_session(7).unwrap().as_deref(), Some("sess-b"));
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM sessions WHERE chat_id = 7", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn clear_reports_presence() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.clear_session(7).unwrap());
        store.set_session(7, "sess-a", 100).unwrap();
        assert!(store.clear_session(7).unwrap());
        assert_eq!(store.get_session(7).unwrap(), None);
    }
}
