//! CRUD operations for [`StoredNote`] records and their collaborator sets.
//!
//! Nothing here checks permissions; callers resolve access first.

use chrono::{DateTime, Utc};
use rusqlite::params;
use snyc_shared::{NoteId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{conversion_error, fmt_ts, now_micros, parse_ts, NoteScope, StoredNote};

const NOTE_COLUMNS: &str =
    "n.id, n.title, n.content, n.is_encrypted, n.parent_id, n.owner_id, n.created_at, n.updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a note. Its collaborator list is ignored; new notes are
    /// private to the owner until shared.
    pub fn insert_note(&self, note: &StoredNote) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notes (id, title, content, is_encrypted, parent_id, owner_id,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                note.id.to_string(),
                note.title,
                note.content,
                note.is_encrypted,
                note.parent_id.map(|p| p.to_string()),
                note.owner_id.to_string(),
                fmt_ts(&note.created_at),
                fmt_ts(&note.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single note with its collaborator set.
    pub fn get_note(&self, id: NoteId) -> Result<StoredNote> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes n WHERE n.id = ?1");
        let mut note = self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_note)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        note.collaborator_ids = self.collaborators_of(id)?;
        Ok(note)
    }

    /// List notes in creation order, paginated.
    pub fn list_notes(&self, scope: NoteScope, limit: u32, offset: u32) -> Result<Vec<StoredNote>> {
        let mut notes = match scope {
            NoteScope::All => {
                let sql = format!(
                    "SELECT {NOTE_COLUMNS} FROM notes n
                     ORDER BY n.created_at ASC, n.rowid ASC
                     LIMIT ?1 OFFSET ?2"
                );
                let mut stmt = self.conn().prepare(&sql)?;
                let rows = stmt.query_map(params![limit, offset], row_to_note)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            NoteScope::VisibleTo(user) => {
                let sql = format!(
                    "SELECT {NOTE_COLUMNS} FROM notes n
                     WHERE n.owner_id = ?1
                        OR EXISTS (SELECT 1 FROM note_collaborators c
                                   WHERE c.note_id = n.id AND c.user_id = ?1)
                     ORDER BY n.created_at ASC, n.rowid ASC
                     LIMIT ?2 OFFSET ?3"
                );
                let mut stmt = self.conn().prepare(&sql)?;
                let rows = stmt.query_map(params![user.to_string(), limit, offset], row_to_note)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        for note in &mut notes {
            note.collaborator_ids = self.collaborators_of(note.id)?;
        }
        Ok(notes)
    }

    /// Collaborators of a note, in the order they were added.
    pub fn collaborators_of(&self, note_id: NoteId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM note_collaborators
             WHERE note_id = ?1
             ORDER BY added_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![note_id.to_string()], |row| {
            let s: String = row.get(0)?;
            UserId::parse(&s).map_err(|e| conversion_error(0, e))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace title, content and encryption flag. Owner, parent and
    /// creation time are immutable. Returns `false` if no such note.
    pub fn replace_note_fields(
        &self,
        id: NoteId,
        title: &str,
        content: &str,
        is_encrypted: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notes SET title = ?2, content = ?3, is_encrypted = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                title,
                content,
                is_encrypted,
                fmt_ts(&updated_at)
            ],
        )?;
        Ok(affected > 0)
    }

    /// Replace only the stored content. Returns `false` if no such note.
    pub fn update_note_content(
        &self,
        id: NoteId,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notes SET content = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), content, fmt_ts(&updated_at)],
        )?;
        Ok(affected > 0)
    }

    /// Add a collaborator. Returns `true` if the user was newly added,
    /// `false` if already present.
    pub fn add_collaborator(&self, note_id: NoteId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO note_collaborators (note_id, user_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![
                note_id.to_string(),
                user_id.to_string(),
                fmt_ts(&now_micros())
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a note; descendants and collaborator rows cascade.
    /// Returns `true` if a row was deleted.
    pub fn delete_note(&self, id: NoteId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM notes WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredNote> {
    let id_str: String = row.get(0)?;
    let parent_str: Option<String> = row.get(4)?;
    let owner_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    let id = NoteId::parse(&id_str).map_err(|e| conversion_error(0, e))?;
    let parent_id = parent_str
        .map(|s| NoteId::parse(&s))
        .transpose()
        .map_err(|e| conversion_error(4, e))?;
    let owner_id = UserId::parse(&owner_str).map_err(|e| conversion_error(5, e))?;
    let created_at = parse_ts(&created_str).map_err(|e| conversion_error(6, e))?;
    let updated_at = parse_ts(&updated_str).map_err(|e| conversion_error(7, e))?;

    Ok(StoredNote {
        id,
        title: row.get(1)?,
        content: row.get(2)?,
        is_encrypted: row.get(3)?,
        parent_id,
        owner_id,
        collaborator_ids: Vec::new(),
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::users::tests::sample_user;
    use chrono::Duration;

    fn setup() -> (Database, User, User) {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user("alice");
        let bob = sample_user("bob");
        db.insert_user(&alice).unwrap();
        db.insert_user(&bob).unwrap();
        (db, alice, bob)
    }

    fn note(owner: UserId, title: &str, parent: Option<NoteId>) -> StoredNote {
        let now = now_micros();
        StoredNote {
            id: NoteId::new(),
            title: title.to_string(),
            content: "hello".to_string(),
            is_encrypted: false,
            parent_id: parent,
            owner_id: owner,
            collaborator_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let (db, alice, _) = setup();
        let n = note(alice.id, "X", None);
        db.insert_note(&n).unwrap();

        assert_eq!(db.get_note(n.id).unwrap(), n);
        assert!(db.get_note(NoteId::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_add_collaborator_is_idempotent() {
        let (db, alice, bob) = setup();
        let n = note(alice.id, "shared", None);
        db.insert_note(&n).unwrap();

        assert!(db.add_collaborator(n.id, bob.id).unwrap());
        assert!(!db.add_collaborator(n.id, bob.id).unwrap());

        assert_eq!(db.get_note(n.id).unwrap().collaborator_ids, vec![bob.id]);
    }

    #[test]
    fn test_listing_scopes() {
        let (db, alice, bob) = setup();
        let own = note(alice.id, "alice's", None);
        let shared = note(bob.id, "bob's shared", None);
        let private = note(bob.id, "bob's private", None);
        for n in [&own, &shared, &private] {
            db.insert_note(n).unwrap();
        }
        db.add_collaborator(shared.id, alice.id).unwrap();

        let visible = db.list_notes(NoteScope::VisibleTo(alice.id), 100, 0).unwrap();
        let ids: Vec<_> = visible.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![own.id, shared.id]);

        assert_eq!(db.list_notes(NoteScope::All, 100, 0).unwrap().len(), 3);
        assert_eq!(db.list_notes(NoteScope::All, 2, 0).unwrap().len(), 2);
        assert_eq!(db.list_notes(NoteScope::All, 100, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_cascades_to_descendants_and_collaborators() {
        let (db, alice, bob) = setup();
        let root = note(alice.id, "root", None);
        let child = note(alice.id, "child", Some(root.id));
        let grandchild = note(alice.id, "grandchild", Some(child.id));
        let unrelated = note(alice.id, "unrelated", None);
        for n in [&root, &child, &grandchild, &unrelated] {
            db.insert_note(n).unwrap();
        }
        db.add_collaborator(child.id, bob.id).unwrap();

        assert!(db.delete_note(root.id).unwrap());

        assert!(db.get_note(child.id).unwrap_err().is_not_found());
        assert!(db.get_note(grandchild.id).unwrap_err().is_not_found());
        assert!(db.get_note(unrelated.id).is_ok());
        assert!(db.collaborators_of(child.id).unwrap().is_empty());
        assert!(!db.delete_note(root.id).unwrap());
    }

    #[test]
    fn test_updates_touch_expected_columns() {
        let (db, alice, _) = setup();
        let n = note(alice.id, "before", None);
        db.insert_note(&n).unwrap();

        let later = n.updated_at + Duration::seconds(5);
        assert!(db
            .replace_note_fields(n.id, "after", "body", true, later)
            .unwrap());
        let reloaded = db.get_note(n.id).unwrap();
        assert_eq!(reloaded.title, "after");
        assert_eq!(reloaded.content, "body");
        assert!(reloaded.is_encrypted);
        assert_eq!(reloaded.updated_at, later);
        assert_eq!(reloaded.created_at, n.created_at);

        assert!(db.update_note_content(n.id, "live edit", later).unwrap());
        assert_eq!(db.get_note(n.id).unwrap().content, "live edit");
        assert!(!db.update_note_content(NoteId::new(), "x", later).unwrap());
    }
}
