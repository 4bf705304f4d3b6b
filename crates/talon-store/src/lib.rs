//! `talon-store` — the single persistent store behind every subsystem.
//!
//! One SQLite file, WAL journaling, foreign keys on, FTS5 external-content
//! indexes kept in sync by triggers. One process-wide [`Store`] handle is
//! created at startup and shared via `Arc`; all access goes through a
//! `Mutex<Connection>` and multi-step mutations run inside transactions.

pub mod error;
pub mod fts;
pub mod schema;
pub mod types;

mod contacts;
mod conversations;
mod memory;
mod sessions;
mod tasks;
mod usage;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{error, info};

pub use error::{Result, StoreError};
pub use types::*;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating parent directories as needed) and initialise the store.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opening store");
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        schema::init_db(&conn)?;

        // A corrupt file is worth knowing about but must not block startup.
        match conn.query_row("PRAGMA integrity_check", [], |r| r.get::<_, String>(0)) {
            Ok(verdict) if verdict == "ok" => {}
            Ok(verdict) => error!(%verdict, "store integrity check failed"),
            Err(e) => error!(error = %e, "store integrity check could not run"),
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Flush and drop the connection. Called once during graceful shutdown.
    pub fn close(self) {
        let conn = self.conn.into_inner().unwrap();
        if let Err((_conn, e)) = conn.close() {
            error!(error = %e, "store close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent_on_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.db");
        {
            let store = Store::open(&path).unwrap();
            store.set_session(1, "s-1", 100).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_session(1).unwrap().as_deref(), Some("s-1"));
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().unwrap();
        let err = store.record_interaction(
            1,
            9999,
            InteractionType::Note,
            InteractionSource::Manual,
            None,
            100,
            100,
        );
        assert!(err.is_err());
    }
}
