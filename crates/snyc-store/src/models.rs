//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use snyc_shared::{
    NoteAcl, NoteId, Principal, Priority, Recurrence, Role, SubscriptionTier, UserId,
};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique contact address, used to resolve share targets.
    pub email: String,
    pub username: String,
    /// bcrypt hash, never serialized to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub subscription: SubscriptionTier,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            role: self.role,
            subscription: self.subscription,
        }
    }
}

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

/// A note row as stored. `content` is ciphertext when `is_encrypted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredNote {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub is_encrypted: bool,
    /// Fixed at creation; notes form a tree.
    pub parent_id: Option<NoteId>,
    /// Fixed at creation.
    pub owner_id: UserId,
    /// Unordered, no duplicates (enforced by the join table key).
    pub collaborator_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredNote {
    pub fn acl(&self) -> NoteAcl<'_> {
        NoteAcl {
            owner_id: &self.owner_id,
            collaborator_ids: &self.collaborator_ids,
        }
    }
}

/// Which notes a listing may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteScope {
    /// Every note (administrators).
    All,
    /// Notes the user owns or collaborates on.
    VisibleTo(UserId),
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// A task row with its category and tags resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub reminder_date: Option<DateTime<Utc>>,
    pub category: Option<Category>,
    pub tags: Vec<Tag>,
    pub recurrence_type: Option<Recurrence>,
    pub recurrence_interval: u32,
    pub next_occurrence: Option<DateTime<Utc>>,
    /// `None` for tasks on the open v1 surface.
    pub owner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Everything a caller may set on a task. Unknown tag ids are dropped on
/// write; the category must exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub reminder_date: Option<DateTime<Utc>>,
    pub category_id: Option<i64>,
    pub tag_ids: Vec<i64>,
    pub recurrence_type: Option<Recurrence>,
    pub recurrence_interval: u32,
    pub next_occurrence: Option<DateTime<Utc>>,
}

/// Which tasks a query may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    /// Every task (administrators).
    All,
    /// Tasks without an owner.
    Unowned,
    OwnedBy(UserId),
}

/// Fixed-width RFC-3339 so stored timestamps sort lexicographically.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Map a UNIQUE violation to [`StoreError::Conflict`] naming the column.
pub(crate) fn map_unique_violation(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref err, Some(ref msg)) = e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains("UNIQUE") {
            let column = msg.rsplit('.').next().unwrap_or("unknown").to_string();
            return StoreError::Conflict(column);
        }
    }
    StoreError::Sqlite(e)
}

pub(crate) fn invalid_enum(idx: usize, value: &str) -> rusqlite::Error {
    conversion_error(
        idx,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected value '{value}'"),
        ),
    )
}

/// Next `updated_at` for a row last touched at `previous`.
///
/// Never goes backwards even if the wall clock does, and is truncated to
/// the stored precision so reads return exactly what was written.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now < previous {
        previous
    } else {
        now
    }
}

/// Current time at storage precision.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    parse_ts(&fmt_ts(&now)).unwrap_or(now)
}
