//! Task operations for the open v1 API and the premium v2 API.
//!
//! Anonymous v1 callers reach only tasks without an owner. A v2 principal
//! reaches the tasks it owns, and admins reach every task. A task outside
//! the caller's reach is reported exactly like a missing one.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use snyc_shared::constants::DEFAULT_PAGE_LIMIT;
use snyc_shared::task::next_occurrence;
use snyc_shared::{Principal, Priority, Recurrence};
use snyc_store::{
    next_timestamp, now_micros, Category, Database, StoreError, Tag, Task, TaskDraft, TaskScope,
};

use crate::api::SharedDb;
use crate::error::ApiError;

/// Payload for create and full replace.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
    #[serde(default)]
    pub recurrence_type: Option<Recurrence>,
    #[serde(default)]
    pub recurrence_interval: u32,
}

impl TaskInput {
    fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::BadRequest("Title must not be empty".into()));
        }
        Ok(())
    }

    /// `next_occurrence` is always recomputed from the submitted dates.
    fn into_draft(self, now: DateTime<Utc>) -> TaskDraft {
        let next_occurrence = next_occurrence(
            self.recurrence_type,
            self.recurrence_interval,
            self.due_date,
            now,
        );
        TaskDraft {
            title: self.title,
            description: self.description,
            completed: self.completed,
            priority: self.priority,
            due_date: self.due_date,
            reminder_date: self.reminder_date,
            category_id: self.category_id,
            tag_ids: self.tag_ids,
            recurrence_type: self.recurrence_type,
            recurrence_interval: self.recurrence_interval,
            next_occurrence,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameInput {
    pub name: String,
}

#[derive(Clone)]
pub struct TaskService {
    db: SharedDb,
}

impl TaskService {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        caller: Option<&Principal>,
        input: TaskInput,
    ) -> Result<Task, ApiError> {
        input.validate()?;
        let db = self.db.lock().await;
        check_category(&db, input.category_id)?;

        let now = now_micros();
        let task = db.insert_task(caller.map(|p| p.id), &input.into_draft(now), now)?;

        info!(task = task.id, owner = ?task.owner_id, "Task created");
        Ok(task)
    }

    /// `limit` is clamped to `1..=100`.
    pub async fn list(
        &self,
        caller: Option<&Principal>,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<Task>, ApiError> {
        let scope = match caller {
            None => TaskScope::Unowned,
            Some(p) if p.is_admin() => TaskScope::All,
            Some(p) => TaskScope::OwnedBy(p.id),
        };
        let limit = limit.clamp(1, DEFAULT_PAGE_LIMIT);

        let db = self.db.lock().await;
        Ok(db.list_tasks(scope, limit, skip)?)
    }

    pub async fn get(&self, caller: Option<&Principal>, id: i64) -> Result<Task, ApiError> {
        let db = self.db.lock().await;
        load_visible(&db, caller, id)
    }

    /// Full replace. Owner and creation time are kept.
    pub async fn update(
        &self,
        caller: Option<&Principal>,
        id: i64,
        input: TaskInput,
    ) -> Result<Task, ApiError> {
        input.validate()?;
        let db = self.db.lock().await;
        let existing = load_visible(&db, caller, id)?;
        check_category(&db, input.category_id)?;

        let now = now_micros();
        let updated_at = next_timestamp(existing.updated_at.unwrap_or(existing.created_at));
        if !db.update_task(id, &input.into_draft(now), updated_at)? {
            return Err(ApiError::TaskNotFound);
        }

        info!(task = id, "Task updated");
        Ok(db.get_task(id)?)
    }

    /// Returns the task as it was.
    pub async fn delete(&self, caller: Option<&Principal>, id: i64) -> Result<Task, ApiError> {
        let db = self.db.lock().await;
        let task = load_visible(&db, caller, id)?;
        if !db.delete_task(id)? {
            return Err(ApiError::TaskNotFound);
        }

        info!(task = id, "Task deleted");
        Ok(task)
    }

    pub async fn create_tag(&self, input: NameInput) -> Result<Tag, ApiError> {
        let name = checked_name(&input.name)?;
        let db = self.db.lock().await;
        match db.insert_tag(name) {
            Ok(tag) => Ok(tag),
            Err(StoreError::Conflict(_)) => Err(ApiError::BadRequest(
                "A tag with this name already exists.".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>, ApiError> {
        Ok(self.db.lock().await.list_tags()?)
    }

    pub async fn create_category(&self, input: NameInput) -> Result<Category, ApiError> {
        let name = checked_name(&input.name)?;
        let db = self.db.lock().await;
        match db.insert_category(name) {
            Ok(category) => Ok(category),
            Err(StoreError::Conflict(_)) => Err(ApiError::BadRequest(
                "A category with this name already exists.".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        Ok(self.db.lock().await.list_categories()?)
    }
}

fn checked_name(raw: &str) -> Result<&str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name must not be empty".into()));
    }
    Ok(name)
}

fn check_category(db: &Database, category_id: Option<i64>) -> Result<(), ApiError> {
    let Some(id) = category_id else {
        return Ok(());
    };
    match db.get_category(id) {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Err(ApiError::BadRequest("Category not found".into())),
        Err(e) => Err(e.into()),
    }
}

fn load_visible(db: &Database, caller: Option<&Principal>, id: i64) -> Result<Task, ApiError> {
    let task = match db.get_task(id) {
        Ok(task) => task,
        Err(e) if e.is_not_found() => return Err(ApiError::TaskNotFound),
        Err(e) => return Err(e.into()),
    };

    let visible = match caller {
        None => task.owner_id.is_none(),
        Some(p) => p.is_admin() || task.owner_id == Some(p.id),
    };
    if !visible {
        return Err(ApiError::TaskNotFound);
    }
    Ok(task)
}
