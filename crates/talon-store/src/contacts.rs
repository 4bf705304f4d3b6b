//! Contact book: upsert by email (or name), FTS lookup, interaction history.

use rusqlite::params;

use crate::error::Result;
use crate::fts::sanitize_query;
use crate::types::{Contact, Interaction, InteractionSource, InteractionType, NewContact};
use crate::Store;

const CONTACT_COLS: &str = "id, chat_id, name, email, phone, company, role, notes, photo_path,
     source, first_seen, last_contact, interaction_count, updated_at";

impl Store {
    /// Insert or update a contact. Identity resolution: `(chat_id, email)`
    /// when an email is known, falling back to `(chat_id, lower(name))`, so
    /// a contact first seen without an email merges once one arrives.
    /// On update, `None` fields leave the stored column untouched.
    pub fn upsert_contact(&self, chat_id: i64, c: &NewContact, now: i64) -> Result<i64> {
        let conn = self.conn();

        let by_email: Option<i64> = match &c.email {
            Some(email) => conn
                .query_row(
                    "SELECT id FROM contacts WHERE chat_id = ?1 AND email = ?2",
                    params![chat_id, email],
                    |r| r.get(0),
                )
                .ok(),
            None => None,
        };
        let existing = match by_email {
            Some(id) => Some(id),
            None => conn
                .query_row(
                    "SELECT id FROM contacts WHERE chat_id = ?1 AND lower(name) = lower(?2)",
                    params![chat_id, c.name],
                    |r| r.get(0),
                )
                .ok(),
        };

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE contacts SET
                         name       = ?1,
                         email      = COALESCE(?2, email),
                         phone      = COALESCE(?3, phone),
                         company    = COALESCE(?4, company),
                         role       = COALESCE(?5, role),
                         notes      = COALESCE(?6, notes),
                         photo_path = COALESCE(?7, photo_path),
                         updated_at = ?8
                     WHERE id = ?9",
                    params![
                        c.name, c.email, c.phone, c.company, c.role, c.notes, c.photo_path,
                        now, id
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO contacts
                     (chat_id, name, email, phone, company, role, notes, photo_path,
                      source, first_seen, last_contact, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10)",
                    params![
                        chat_id, c.name, c.email, c.phone, c.company, c.role, c.notes,
                        c.photo_path, c.source, now
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    pub fn get_contact(&self, chat_id: i64, id: i64) -> Result<Option<Contact>> {
        let conn = self.conn();
        match conn.query_row(
            &format!("SELECT {CONTACT_COLS} FROM contacts WHERE chat_id = ?1 AND id = ?2"),
            params![chat_id, id],
            row_to_contact,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Interactions cascade with the contact row.
    pub fn delete_contact(&self, chat_id: i64, id: i64) -> Result<bool> {
        let n = self.conn().execute(
            "DELETE FROM contacts WHERE chat_id = ?1 AND id = ?2",
            params![chat_id, id],
        )?;
        Ok(n > 0)
    }

    /// Full-text lookup over name/email/company/role/notes.
    pub fn search_contacts(&self, chat_id: i64, query: &str, limit: usize) -> Result<Vec<Contact>> {
        let Some(fts_query) = sanitize_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.chat_id, c.name, c.email, c.phone, c.company, c.role, c.notes,
                    c.photo_path, c.source, c.first_seen, c.last_contact,
                    c.interaction_count, c.updated_at
             FROM contacts c
             JOIN contacts_fts f ON c.id = f.rowid
             WHERE c.chat_id = ?1 AND contacts_fts MATCH ?2
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![chat_id, fts_query, limit as i64], row_to_contact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insert an interaction and bump the contact's `last_contact` and
    /// `interaction_count` in the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn record_interaction(
        &self,
        chat_id: i64,
        contact_id: i64,
        kind: InteractionType,
        source: InteractionSource,
        summary: Option<&str>,
        date: i64,
        now: i64,
    ) -> Result<i64> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO interactions (chat_id, contact_id, type, source, summary, date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat_id,
                contact_id,
                kind.to_string(),
                source.to_string(),
                summary,
                date,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE contacts
             SET last_contact = MAX(last_contact, ?1),
                 interaction_count = interaction_count + 1,
                 updated_at = ?2
             WHERE id = ?3",
            params![date, now, contact_id],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn list_interactions(&self, contact_id: i64, limit: usize) -> Result<Vec<Interaction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, contact_id, type, source, summary, date, created_at
             FROM interactions
             WHERE contact_id = ?1
             ORDER BY date DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![contact_id, limit as i64], |row| {
            let kind: String = row.get(3)?;
            let source: String = row.get(4)?;
            Ok(Interaction {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                contact_id: row.get(2)?,
                kind: kind.parse().unwrap_or(InteractionType::Other),
                source: source.parse().unwrap_or(InteractionSource::Manual),
                summary: row.get(5)?,
                date: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        company: row.get(5)?,
        role: row.get(6)?,
        notes: row.get(7)?,
        photo_path: row.get(8)?,
        source: row.get(9)?,
        first_seen: row.get(10)?,
        last_contact: row.get(11)?,
        interaction_count: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: &str, email: Option<&str>) -> NewContact {
        NewContact {
            name: name.to_string(),
            email: email.map(String::from),
            source: "manual".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_merges_by_email() {
        let s = Store::open_in_memory().unwrap();
        let a = s.upsert_contact(1, &contact("Ada L", Some("ada@x.test")), 100).unwrap();
        let b = s
            .upsert_contact(
                1,
                &NewContact {
                    company: Some("Analytical".into()),
                    ..contact("Ada Lovelace", Some("ada@x.test"))
                },
                200,
            )
            .unwrap();
        assert_eq!(a, b);
        let c = s.get_contact(1, a).unwrap().unwrap();
        assert_eq!(c.name, "Ada Lovelace");
        assert_eq!(c.company.as_deref(), Some("Analytical"));
        assert_eq!(c.first_seen, 100);
    }

    #[test]
    fn upsert_merges_by_case_insensitive_name_without_email() {
        let s = Store::open_in_memory().unwrap();
        let a = s.upsert_contact(1, &contact("Grace Hopper", None), 100).unwrap();
        let b = s.upsert_contact(1, &contact("grace hopper", None), 200).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn same_name_in_other_chat_is_a_distinct_contact() {
        let s = Store::open_in_memory().unwrap();
        let a = s.upsert_contact(1, &contact("Grace Hopper", None), 100).unwrap();
        let b = s.upsert_contact(2, &contact("Grace Hopper", None), 100).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn update_keeps_existing_fields_when_not_provided() {
        let s = Store::open_in_memory().unwrap();
        let id = s
            .upsert_contact(
                1,
                &NewContact {
                    phone: Some("+4930123".into()),
                    ..contact("Ada", Some("ada@x.test"))
                },
                100,
            )
            .unwrap();
        s.upsert_contact(1, &contact("Ada", Some("ada@x.test")), 200).unwrap();
        let c = s.get_contact(1, id).unwrap().unwrap();
        assert_eq!(c.phone.as_deref(), Some("+4930123"));
    }

    #[test]
    fn search_matches_notes_and_company() {
        let s = Store::open_in_memory().unwrap();
        s.upsert_contact(
            1,
            &NewContact {
                notes: Some("met at the compilers conference".into()),
                ..contact("Dennis R", None)
            },
            100,
        )
        .unwrap();
        let hits = s.search_contacts(1, "compilers", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(s.search_contacts(1, "", 5).unwrap().is_empty());
    }

    #[test]
    fn interactions_bump_contact_counters() {
        let s = Store::open_in_memory().unwrap();
        let id = s.upsert_contact(1, &contact("Ada", None), 100).unwrap();
        s.record_interaction(1, id, InteractionType::Call, InteractionSource::Manual, Some("intro call"), 300, 300)
            .unwrap();
        s.record_interaction(1, id, InteractionType::Email, InteractionSource::Auto, None, 250, 300)
            .unwrap();
        let c = s.get_contact(1, id).unwrap().unwrap();
        assert_eq!(c.interaction_count, 2);
        assert_eq!(c.last_contact, 300);
        assert_eq!(s.list_interactions(id, 10).unwrap().len(), 2);
    }

    #[test]
    fn deleting_a_contact_cascades_to_interactions() {
        let s = Store::open_in_memory().unwrap();
        let id = s.upsert_contact(1, &contact("Ada", None), 100).unwrap();
        s.record_interaction(1, id, InteractionType::Note, InteractionSource::Manual, None, 100, 100)
            .unwrap();
        assert!(s.delete_contact(1, id).unwrap());
        assert!(s.list_interactions(id, 10).unwrap().is_empty());
        // FTS row is gone as well.
        assert!(s.search_contacts(1, "ada", 5).unwrap().is_empty());
    }
}
