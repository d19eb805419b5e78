//! CRUD operations for [`Task`] records, their tags and categories.
//!
//! Ownership is a filter, not a permission check: callers pick the
//! [`TaskScope`] that matches who is asking.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use snyc_shared::{Priority, Recurrence, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    conversion_error, fmt_ts, invalid_enum, map_unique_violation, parse_ts, Category, Tag, Task,
    TaskDraft, TaskScope,
};

const TASK_SELECT: &str = "SELECT t.id, t.title, t.description, t.completed, t.priority,
            t.due_date, t.reminder_date, t.category_id, c.name,
            t.recurrence_type, t.recurrence_interval, t.next_occurrence,
            t.owner_id, t.created_at, t.updated_at
     FROM tasks t LEFT JOIN categories c ON c.id = t.category_id";

impl Database {
    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert a task and its tag links in one transaction. Returns the
    /// stored task.
    pub fn insert_task(
        &self,
        owner: Option<UserId>,
        draft: &TaskDraft,
        created_at: DateTime<Utc>,
    ) -> Result<Task> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO tasks (title, description, completed, priority, due_date, reminder_date,
                                category_id, recurrence_type, recurrence_interval,
                                next_occurrence, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                draft.title,
                draft.description,
                draft.completed,
                draft.priority.as_str(),
                draft.due_date.as_ref().map(fmt_ts),
                draft.reminder_date.as_ref().map(fmt_ts),
                draft.category_id,
                draft.recurrence_type.map(|r| r.as_str()),
                draft.recurrence_interval,
                draft.next_occurrence.as_ref().map(fmt_ts),
                owner.map(|o| o.to_string()),
                fmt_ts(&created_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        link_tags(&tx, id, &draft.tag_ids)?;
        tx.commit()?;

        self.get_task(id)
    }

    pub fn get_task(&self, id: i64) -> Result<Task> {
        let sql = format!("{TASK_SELECT} WHERE t.id = ?1");
        let mut task = self
            .conn()
            .query_row(&sql, params![id], row_to_task)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        task.tags = self.tags_of(id)?;
        Ok(task)
    }

    /// Tasks in creation order, paginated.
    pub fn list_tasks(&self, scope: TaskScope, limit: u32, offset: u32) -> Result<Vec<Task>> {
        let mut tasks = match scope {
            TaskScope::All => self.query_tasks(
                &format!("{TASK_SELECT} ORDER BY t.id LIMIT ?1 OFFSET ?2"),
                params![limit, offset],
            )?,
            TaskScope::Unowned => self.query_tasks(
                &format!("{TASK_SELECT} WHERE t.owner_id IS NULL ORDER BY t.id LIMIT ?1 OFFSET ?2"),
                params![limit, offset],
            )?,
            TaskScope::OwnedBy(owner) => self.query_tasks(
                &format!("{TASK_SELECT} WHERE t.owner_id = ?1 ORDER BY t.id LIMIT ?2 OFFSET ?3"),
                params![owner.to_string(), limit, offset],
            )?,
        };

        for task in &mut tasks {
            task.tags = self.tags_of(task.id)?;
        }
        Ok(tasks)
    }

    /// Replace every caller-settable field and the tag set. Owner and
    /// creation time are kept. Returns `false` if no such task.
    pub fn update_task(&self, id: i64, draft: &TaskDraft, updated_at: DateTime<Utc>) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;
        let affected = tx.execute(
            "UPDATE tasks SET title = ?2, description = ?3, completed = ?4, priority = ?5,
                              due_date = ?6, reminder_date = ?7, category_id = ?8,
                              recurrence_type = ?9, recurrence_interval = ?10,
                              next_occurrence = ?11, updated_at = ?12
             WHERE id = ?1",
            params![
                id,
                draft.title,
                draft.description,
                draft.completed,
                draft.priority.as_str(),
                draft.due_date.as_ref().map(fmt_ts),
                draft.reminder_date.as_ref().map(fmt_ts),
                draft.category_id,
                draft.recurrence_type.map(|r| r.as_str()),
                draft.recurrence_interval,
                draft.next_occurrence.as_ref().map(fmt_ts),
                fmt_ts(&updated_at),
            ],
        )?;
        if affected == 0 {
            return Ok(false);
        }

        tx.execute("DELETE FROM task_tags WHERE task_id = ?1", params![id])?;
        link_tags(&tx, id, &draft.tag_ids)?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete a task; its tag links cascade. Returns `true` if a row was
    /// deleted.
    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn query_tasks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Task>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, row_to_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn tags_of(&self, task_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name FROM task_tags tt JOIN tags g ON g.id = tt.tag_id
             WHERE tt.task_id = ?1 ORDER BY g.id",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Tags and categories
    // ------------------------------------------------------------------

    /// A duplicate name is [`StoreError::Conflict`].
    pub fn insert_tag(&self, name: &str) -> Result<Tag> {
        self.conn()
            .execute("INSERT INTO tags (name) VALUES (?1)", params![name])
            .map_err(map_unique_violation)?;
        Ok(Tag {
            id: self.conn().last_insert_rowid(),
            name: name.to_string(),
        })
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self.conn().prepare("SELECT id, name FROM tags ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// A duplicate name is [`StoreError::Conflict`].
    pub fn insert_category(&self, name: &str) -> Result<Category> {
        self.conn()
            .execute("INSERT INTO categories (name) VALUES (?1)", params![name])
            .map_err(map_unique_violation)?;
        Ok(Category {
            id: self.conn().last_insert_rowid(),
            name: name.to_string(),
        })
    }

    pub fn get_category(&self, id: i64) -> Result<Category> {
        self.conn()
            .query_row(
                "SELECT id, name FROM categories WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name FROM categories ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Link existing tags; ids with no tag row are skipped.
fn link_tags(conn: &Connection, task_id: i64, tag_ids: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO task_tags (task_id, tag_id)
         SELECT ?1, id FROM tags WHERE id = ?2",
    )?;
    for tag_id in tag_ids {
        stmt.execute(params![task_id, tag_id])?;
    }
    Ok(())
}

fn opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let priority_str: String = row.get(4)?;
    let priority = Priority::parse(&priority_str).ok_or_else(|| invalid_enum(4, &priority_str))?;

    let category_id: Option<i64> = row.get(7)?;
    let category_name: Option<String> = row.get(8)?;
    let category = category_id
        .zip(category_name)
        .map(|(id, name)| Category { id, name });

    let recurrence_str: Option<String> = row.get(9)?;
    let recurrence_type = recurrence_str
        .map(|s| Recurrence::parse(&s).ok_or_else(|| invalid_enum(9, &s)))
        .transpose()?;

    let owner_str: Option<String> = row.get(12)?;
    let owner_id = owner_str
        .map(|s| UserId::parse(&s))
        .transpose()
        .map_err(|e| conversion_error(12, e))?;

    let created_str: String = row.get(13)?;
    let created_at = parse_ts(&created_str).map_err(|e| conversion_error(13, e))?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        priority,
        due_date: opt_ts(row, 5)?,
        reminder_date: opt_ts(row, 6)?,
        category,
        tags: Vec::new(),
        recurrence_type,
        recurrence_interval: row.get(10)?,
        next_occurrence: opt_ts(row, 11)?,
        owner_id,
        created_at,
        updated_at: opt_ts(row, 14)?,
    })
}
