//! Note operations on behalf of a principal.
//!
//! Every operation resolves the note and checks [`can_access`] before
//! touching it. A note the caller may not access is reported exactly like
//! a missing one. Content is sealed with the [`ContentCipher`] on the way
//! into the store and opened on the way out, so callers only ever see
//! plaintext. Only a single-note read fails on content that cannot be
//! opened; listings and mutations return such notes flagged
//! `decryption_failed` with empty content.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snyc_shared::constants::{DEFAULT_PAGE_LIMIT, MAX_CONTENT_SIZE};
use snyc_shared::crypto::ContentCipher;
use snyc_shared::{can_access, NoteId, Principal, UserId};
use snyc_store::{next_timestamp, now_micros, Database, NoteScope, StoredNote};

use crate::api::SharedDb;
use crate::error::ApiError;

/// A note as returned to clients. `content` is always plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    /// Set when stored content could not be opened; `content` is then empty.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub decryption_failed: bool,
    pub is_encrypted: bool,
    pub parent_id: Option<NoteId>,
    pub owner_id: UserId,
    pub collaborator_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    fn from_stored(stored: StoredNote, content: String) -> Self {
        Self {
            id: stored.id,
            title: stored.title,
            content,
            decryption_failed: false,
            is_encrypted: stored.is_encrypted,
            parent_id: stored.parent_id,
            owner_id: stored.owner_id,
            collaborator_ids: stored.collaborator_ids,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

/// Payload for create and full replace.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteInput {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub is_encrypted: bool,
    /// Honoured on create only.
    #[serde(default)]
    pub parent_id: Option<NoteId>,
}

impl NoteInput {
    fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::BadRequest("Title must not be empty".into()));
        }
        if self.content.len() > MAX_CONTENT_SIZE {
            return Err(ApiError::BadRequest(format!(
                "Content too large: {} bytes (max {MAX_CONTENT_SIZE})",
                self.content.len()
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct NoteService {
    db: SharedDb,
    cipher: Arc<ContentCipher>,
}

impl NoteService {
    pub fn new(db: SharedDb, cipher: ContentCipher) -> Self {
        Self {
            db,
            cipher: Arc::new(cipher),
        }
    }

    pub async fn create(&self, principal: &Principal, input: NoteInput) -> Result<Note, ApiError> {
        input.validate()?;
        let db = self.db.lock().await;

        if let Some(parent_id) = input.parent_id {
            load_accessible(&db, principal, parent_id)?;
        }

        let now = now_micros();
        let stored = StoredNote {
            id: NoteId::new(),
            title: input.title,
            content: self.cipher.seal(&input.content, input.is_encrypted)?,
            is_encrypted: input.is_encrypted,
            parent_id: input.parent_id,
            owner_id: principal.id,
            collaborator_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        db.insert_note(&stored)?;

        info!(note = %stored.id, owner = %principal.id, encrypted = stored.is_encrypted, "Note created");
        Ok(Note::from_stored(stored, input.content))
    }

    pub async fn get(&self, principal: &Principal, id: NoteId) -> Result<Note, ApiError> {
        let db = self.db.lock().await;
        let stored = load_accessible(&db, principal, id)?;
        self.render(stored)
    }

    /// Access check without decrypting anything.
    pub async fn check_access(&self, principal: &Principal, id: NoteId) -> Result<(), ApiError> {
        let db = self.db.lock().await;
        load_accessible(&db, principal, id).map(|_| ())
    }

    /// Admins see every note; everyone else sees what they own or
    /// collaborate on. `limit` is clamped to `1..=100`.
    pub async fn list(
        &self,
        principal: &Principal,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Note>, ApiError> {
        let scope = if principal.is_admin() {
            NoteScope::All
        } else {
            NoteScope::VisibleTo(principal.id)
        };
        let limit = limit.clamp(1, DEFAULT_PAGE_LIMIT);

        let db = self.db.lock().await;
        Ok(db
            .list_notes(scope, limit, skip)?
            .into_iter()
            .map(|stored| self.render_lossy(stored))
            .collect())
    }

    /// Full replace of title, content and encryption flag.
    pub async fn update(
        &self,
        principal: &Principal,
        id: NoteId,
        input: NoteInput,
    ) -> Result<Note, ApiError> {
        input.validate()?;
        let db = self.db.lock().await;
        let stored = load_accessible(&db, principal, id)?;

        if input.parent_id.is_some() && input.parent_id != stored.parent_id {
            debug!(note = %id, "Ignoring parent_id change on update");
        }

        let sealed = self.cipher.seal(&input.content, input.is_encrypted)?;
        let updated_at = next_timestamp(stored.updated_at);
        if !db.replace_note_fields(id, &input.title, &sealed, input.is_encrypted, updated_at)? {
            return Err(ApiError::NoteNotFound);
        }

        let reloaded = db.get_note(id)?;
        info!(note = %id, user = %principal.id, "Note updated");
        Ok(Note::from_stored(reloaded, input.content))
    }

    /// Delete a note and, through the store's cascade, its descendants.
    /// Returns the note as it was.
    pub async fn delete(&self, principal: &Principal, id: NoteId) -> Result<Note, ApiError> {
        let db = self.db.lock().await;
        let stored = load_accessible(&db, principal, id)?;
        let note = self.render_lossy(stored);

        if !db.delete_note(id)? {
            return Err(ApiError::NoteNotFound);
        }

        info!(note = %id, user = %principal.id, "Note deleted");
        Ok(note)
    }

    /// Grant `email`'s owner access to the note. Sharing with someone who
    /// already has access is a no-op.
    pub async fn share(
        &self,
        principal: &Principal,
        id: NoteId,
        email: &str,
    ) -> Result<Note, ApiError> {
        let db = self.db.lock().await;
        let stored = load_accessible(&db, principal, id)?;

        let target = match db.get_user_by_email(email.trim()) {
            Ok(user) => user,
            Err(e) if e.is_not_found() => return Err(ApiError::UserNotFound),
            Err(e) => return Err(e.into()),
        };

        if target.id != stored.owner_id && db.add_collaborator(id, target.id)? {
            info!(note = %id, by = %principal.id, with = %target.id, "Note shared");
        }

        let reloaded = db.get_note(id)?;
        Ok(self.render_lossy(reloaded))
    }

    /// Replace the content of a note from a collaboration session.
    ///
    /// `on_commit` runs after the write succeeds and before the store is
    /// released, so anything it does for one note happens in commit order.
    /// It does not run if the write fails.
    pub async fn update_content<F>(
        &self,
        principal: &Principal,
        id: NoteId,
        content: &str,
        on_commit: F,
    ) -> Result<Note, ApiError>
    where
        F: FnOnce(&Note),
    {
        if content.len() > MAX_CONTENT_SIZE {
            return Err(ApiError::BadRequest("Content too large".into()));
        }

        let db = self.db.lock().await;
        let stored = load_accessible(&db, principal, id)?;

        let sealed = self.cipher.seal(content, stored.is_encrypted)?;
        let updated_at = next_timestamp(stored.updated_at);
        if !db.update_note_content(id, &sealed, updated_at)? {
            return Err(ApiError::NoteNotFound);
        }

        let note = Note::from_stored(
            StoredNote {
                updated_at,
                ..stored
            },
            content.to_string(),
        );
        on_commit(&note);
        Ok(note)
    }

    fn render(&self, stored: StoredNote) -> Result<Note, ApiError> {
        let content = self.cipher.open(&stored.content, stored.is_encrypted)?;
        Ok(Note::from_stored(stored, content))
    }

    fn render_lossy(&self, stored: StoredNote) -> Note {
        match self.cipher.open(&stored.content, stored.is_encrypted) {
            Ok(content) => Note::from_stored(stored, content),
            Err(e) => {
                warn!(note = %stored.id, error = %e, "Returning note without content");
                Note {
                    decryption_failed: true,
                    ..Note::from_stored(stored, String::new())
                }
            }
        }
    }
}

fn load_accessible(db: &Database, principal: &Principal, id: NoteId) -> Result<StoredNote, ApiError> {
    let stored = match db.get_note(id) {
        Ok(stored) => stored,
        Err(e) if e.is_not_found() => return Err(ApiError::NoteNotFound),
        Err(e) => return Err(e.into()),
    };

    if !can_access(principal, stored.acl()) {
        debug!(note = %id, user = %principal.id, "Access denied, reporting not found");
        return Err(ApiError::NoteNotFound);
    }
    Ok(stored)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use snyc_shared::constants::MIN_PASSWORD_COST;
    use snyc_shared::password::hash_password;
    use snyc_shared::{Role, SubscriptionTier};
    use snyc_store::User;
    use tokio::sync::Mutex;

    pub fn shared_db() -> SharedDb {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    pub async fn add_user(db: &SharedDb, name: &str, role: Role) -> Principal {
        let now = now_micros();
        let user = User {
            id: UserId::new(),
            email: format!("{name}@example.com"),
            username: name.to_string(),
            password_hash: hash_password("password123", MIN_PASSWORD_COST).unwrap(),
            role,
            subscription: SubscriptionTier::Premium,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        db.lock().await.insert_user(&user).unwrap();
        user.principal()
    }

    pub fn input(title: &str, content: &str, is_encrypted: bool) -> NoteInput {
        NoteInput {
            title: title.into(),
            content: content.into(),
            is_encrypted,
            parent_id: None,
        }
    }

    fn service(db: &SharedDb) -> NoteService {
        NoteService::new(db.clone(), ContentCipher::from_passphrase("test"))
    }

    #[tokio::test]
    async fn test_stranger_sees_not_found_like_missing_note() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;
        let carol = add_user(&db, "carol", Role::Standard).await;

        let note = notes.create(&alice, input("X", "hello", false)).await.unwrap();

        let denied = notes.get(&carol, note.id).await.unwrap_err();
        let missing = notes.get(&carol, NoteId::new()).await.unwrap_err();
        assert!(matches!(denied, ApiError::NoteNotFound));
        assert_eq!(denied.to_string(), missing.to_string());

        assert!(matches!(
            notes.delete(&carol, note.id).await,
            Err(ApiError::NoteNotFound)
        ));
        assert!(notes.get(&alice, note.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_reaches_every_note() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;
        let root = add_user(&db, "root", Role::Admin).await;

        let note = notes.create(&alice, input("X", "hello", false)).await.unwrap();
        assert_eq!(notes.get(&root, note.id).await.unwrap().content, "hello");
        assert_eq!(notes.list(&root, 0, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_share_is_idempotent_and_grants_access() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;
        let bob = add_user(&db, "bob", Role::Standard).await;

        let note = notes.create(&alice, input("X", "hello", false)).await.unwrap();
        notes.share(&alice, note.id, "bob@example.com").await.unwrap();
        let shared = notes.share(&alice, note.id, "bob@example.com").await.unwrap();
        assert_eq!(shared.collaborator_ids, vec![bob.id]);

        assert!(notes.get(&bob, note.id).await.is_ok());
        assert_eq!(notes.list(&bob, 0, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_share_errors_are_distinct() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;
        let carol = add_user(&db, "carol", Role::Standard).await;
        let note = notes.create(&alice, input("X", "hello", false)).await.unwrap();

        assert!(matches!(
            notes.share(&alice, note.id, "nobody@example.com").await,
            Err(ApiError::UserNotFound)
        ));
        assert!(matches!(
            notes.share(&carol, note.id, "carol@example.com").await,
            Err(ApiError::NoteNotFound)
        ));
    }

    #[tokio::test]
    async fn test_encrypted_content_is_sealed_at_rest() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;

        let note = notes.create(&alice, input("secret", "hello", true)).await.unwrap();
        assert_eq!(note.content, "hello");

        let raw = db.lock().await.get_note(note.id).unwrap();
        assert_ne!(raw.content, "hello");
        assert_eq!(notes.get(&alice, note.id).await.unwrap().content, "hello");

        // Toggling the flag re-encodes what is stored.
        notes
            .update(&alice, note.id, input("secret", "plain now", false))
            .await
            .unwrap();
        let raw = db.lock().await.get_note(note.id).unwrap();
        assert_eq!(raw.content, "plain now");
        assert!(!raw.is_encrypted);
    }

    #[tokio::test]
    async fn test_wrong_key_is_a_decryption_error() {
        let db = shared_db();
        let alice = add_user(&db, "alice", Role::Standard).await;
        let note = service(&db)
            .create(&alice, input("secret", "hello", true))
            .await
            .unwrap();

        let rotated = NoteService::new(db.clone(), ContentCipher::from_passphrase("rotated"));
        assert!(matches!(
            rotated.get(&alice, note.id).await,
            Err(ApiError::Decryption)
        ));
    }

    #[tokio::test]
    async fn test_unreadable_note_does_not_break_list_or_delete() {
        let db = shared_db();
        let alice = add_user(&db, "alice", Role::Standard).await;
        let bob = add_user(&db, "bob", Role::Standard).await;
        let sealed = service(&db)
            .create(&alice, input("secret", "hello", true))
            .await
            .unwrap();
        let plain = service(&db)
            .create(&alice, input("plain", "visible", false))
            .await
            .unwrap();

        let rotated = NoteService::new(db.clone(), ContentCipher::from_passphrase("rotated"));
        let listed = rotated.list(&alice, 0, 100).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].decryption_failed);
        assert_eq!(listed[0].content, "");
        assert!(!listed[1].decryption_failed);
        assert_eq!(listed[1].content, plain.content);

        let shared = rotated.share(&alice, sealed.id, "bob@example.com").await.unwrap();
        assert!(shared.decryption_failed);
        assert_eq!(shared.collaborator_ids, vec![bob.id]);

        let deleted = rotated.delete(&alice, sealed.id).await.unwrap();
        assert!(deleted.decryption_failed);
        assert!(matches!(
            rotated.get(&alice, sealed.id).await,
            Err(ApiError::NoteNotFound)
        ));

        let json = serde_json::to_value(&listed[1]).unwrap();
        assert!(json.get("decryption_failed").is_none());
    }

    #[tokio::test]
    async fn test_parent_must_be_accessible() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;
        let carol = add_user(&db, "carol", Role::Standard).await;
        let parent = notes.create(&alice, input("parent", "", false)).await.unwrap();

        let mut child = input("child", "", false);
        child.parent_id = Some(parent.id);
        assert!(matches!(
            notes.create(&carol, child.clone()).await,
            Err(ApiError::NoteNotFound)
        ));

        let created = notes.create(&alice, child).await.unwrap();
        assert_eq!(created.parent_id, Some(parent.id));

        // Parent is fixed after creation.
        let mut moved = input("child", "", false);
        moved.parent_id = Some(NoteId::new());
        let updated = notes.update(&alice, created.id, moved).await.unwrap();
        assert_eq!(updated.parent_id, Some(parent.id));

        notes.delete(&alice, parent.id).await.unwrap();
        assert!(matches!(
            notes.get(&alice, created.id).await,
            Err(ApiError::NoteNotFound)
        ));
    }

    #[tokio::test]
    async fn test_validation_and_pagination() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;

        assert!(matches!(
            notes.create(&alice, input("  ", "x", false)).await,
            Err(ApiError::BadRequest(_))
        ));

        for i in 0..3 {
            notes
                .create(&alice, input(&format!("n{i}"), "", false))
                .await
                .unwrap();
        }
        let page = notes.list(&alice, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "n1");
        // A zero limit is clamped up to one.
        assert_eq!(notes.list(&alice, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_content_update_commits_before_callback() {
        let db = shared_db();
        let notes = service(&db);
        let alice = add_user(&db, "alice", Role::Standard).await;
        let carol = add_user(&db, "carol", Role::Standard).await;
        let note = notes.create(&alice, input("X", "hello", true)).await.unwrap();

        let mut seen = None;
        let updated = notes
            .update_content(&alice, note.id, "hello world", |n| {
                seen = Some(n.content.clone())
            })
            .await
            .unwrap();
        assert_eq!(seen.as_deref(), Some("hello world"));
        assert!(updated.updated_at >= note.updated_at);
        assert_eq!(
            notes.get(&alice, note.id).await.unwrap().content,
            "hello world"
        );

        let mut called = false;
        let denied = notes
            .update_content(&carol, note.id, "vandalism", |_| called = true)
            .await;
        assert!(matches!(denied, Err(ApiError::NoteNotFound)));
        assert!(!called);
    }
}
