use rusqlite::Connection;

use crate::error::Result;

/// Create every table, index and FTS trigger. Safe to call on each startup;
/// `IF NOT EXISTS` throughout.
///
/// The FTS5 tables are external-content; the triggers keep them mirrored to
/// their base tables inside the same transaction as the base-row mutation.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            chat_id    INTEGER PRIMARY KEY,
            session_id TEXT    NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL,
            topic_key   TEXT,
            content     TEXT    NOT NULL,
            sector      TEXT    NOT NULL CHECK (sector IN ('semantic','episodic')),
            salience    REAL    NOT NULL DEFAULT 1.0,
            created_at  INTEGER NOT NULL,
            accessed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_chat
            ON memories(chat_id, accessed_at DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
            USING fts5(content, content='memories', content_rowid='id');

        CREATE TRIGGER IF NOT EXISTS memories_fts_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS memories_fts_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content)
                VALUES ('delete', old.id, old.content);
        END;
        CREATE TRIGGER IF NOT EXISTS memories_fts_au AFTER UPDATE OF content ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, content)
                VALUES ('delete', old.id, old.content);
            INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
        END;

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id          TEXT    PRIMARY KEY,
            chat_id     INTEGER NOT NULL,
            prompt      TEXT    NOT NULL,
            schedule    TEXT    NOT NULL,
            next_run    INTEGER NOT NULL,
            last_run    INTEGER,
            last_result TEXT,
            status      TEXT    NOT NULL DEFAULT 'active'
                        CHECK (status IN ('active','paused')),
            created_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_due
            ON scheduled_tasks(status, next_run);

        CREATE TABLE IF NOT EXISTS conversations (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id    INTEGER NOT NULL,
            session_id TEXT,
            role       TEXT    NOT NULL CHECK (role IN ('user','assistant')),
            content    TEXT    NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conv_chat
            ON conversations(chat_id, id DESC);

        CREATE TABLE IF NOT EXISTS token_usage (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id       INTEGER NOT NULL,
            session_id    TEXT,
            input_tokens  INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read    INTEGER NOT NULL DEFAULT 0,
            cost_usd      REAL    NOT NULL DEFAULT 0,
            did_compact   INTEGER NOT NULL DEFAULT 0,
            created_at    INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_chat
            ON token_usage(chat_id, id DESC);

        CREATE TABLE IF NOT EXISTS contacts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id           INTEGER NOT NULL,
            name              TEXT    NOT NULL,
            email             TEXT,
            phone             TEXT,
            company           TEXT,
            role              TEXT,
            notes             TEXT,
            photo_path        TEXT,
            source            TEXT    NOT NULL DEFAULT 'manual',
            first_seen        INTEGER NOT NULL,
            last_contact      INTEGER NOT NULL,
            interaction_count INTEGER NOT NULL DEFAULT 0,
            updated_at        INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_email
            ON contacts(chat_id, email) WHERE email IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_name
            ON contacts(chat_id, lower(name)) WHERE email IS NULL;

        CREATE VIRTUAL TABLE IF NOT EXISTS contacts_fts
            USING fts5(name, email, company, role, notes,
                       content='contacts', content_rowid='id');

        CREATE TRIGGER IF NOT EXISTS contacts_fts_ai AFTER INSERT ON contacts BEGIN
            INSERT INTO contacts_fts(rowid, name, email, company, role, notes)
                VALUES (new.id, new.name, new.email, new.company, new.role, new.notes);
        END;
        CREATE TRIGGER IF NOT EXISTS contacts_fts_ad AFTER DELETE ON contacts BEGIN
            INSERT INTO contacts_fts(contacts_fts, rowid, name, email, company, role, notes)
                VALUES ('delete', old.id, old.name, old.email, old.company, old.role, old.notes);
        END;
        CREATE TRIGGER IF NOT EXISTS contacts_fts_au
            AFTER UPDATE OF name, email, company, role, notes ON contacts
        BEGIN
            INSERT INTO contacts_fts(contacts_fts, rowid, name, email, company, role, notes)
                VALUES ('delete', old.id, old.name, old.email, old.company, old.role, old.notes);
            INSERT INTO contacts_fts(rowid, name, email, company, role, notes)
                VALUES (new.id, new.name, new.email, new.company, new.role, new.notes);
        END;

        CREATE TABLE IF NOT EXISTS interactions (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id    INTEGER NOT NULL,
            contact_id INTEGER NOT NULL
                       REFERENCES contacts(id) ON DELETE CASCADE,
            type       TEXT    NOT NULL
                       CHECK (type IN ('email','meeting','call','note','other')),
            source     TEXT    NOT NULL DEFAULT 'manual'
                       CHECK (source IN ('manual','auto')),
            summary    TEXT,
            date       INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_interactions_contact
            ON interactions(contact_id, date DESC);
        ",
    )?;
    Ok(())
}
