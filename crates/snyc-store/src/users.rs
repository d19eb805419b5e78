//! CRUD operations for [`User`] records.

use rusqlite::params;
use snyc_shared::{Role, SubscriptionTier, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    conversion_error, fmt_ts, invalid_enum, map_unique_violation, now_micros, parse_ts, User,
};

const USER_COLUMNS: &str =
    "id, email, username, password_hash, role, subscription, is_active, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user. A duplicate email or username is reported as
    /// [`StoreError::Conflict`] naming the column.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, email, username, password_hash, role, subscription,
                                    is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.username,
                    user.password_hash,
                    user.role.as_str(),
                    user.subscription.as_str(),
                    user.is_active,
                    fmt_ts(&user.created_at),
                    fmt_ts(&user.updated_at),
                ],
            )
            .map_err(map_unique_violation)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.query_user("id = ?1", &id.to_string())
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.query_user("email = ?1", email)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.query_user("username = ?1", username)
    }

    fn query_user(&self, predicate: &str, value: &str) -> Result<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        self.conn()
            .query_row(&sql, params![value], row_to_user)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Change a user's subscription tier. Returns `false` if no such user.
    pub fn set_subscription(&self, id: UserId, tier: SubscriptionTier) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET subscription = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), tier.as_str(), fmt_ts(&now_micros())],
        )?;
        Ok(affected > 0)
    }

    /// Change a user's role. Returns `false` if no such user.
    pub fn set_role(&self, id: UserId, role: Role) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET role = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), role.as_str(), fmt_ts(&now_micros())],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    let tier_str: String = row.get(5)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;

    let id = UserId::parse(&id_str).map_err(|e| conversion_error(0, e))?;
    let role = Role::parse(&role_str).ok_or_else(|| invalid_enum(4, &role_str))?;
    let subscription =
        SubscriptionTier::parse(&tier_str).ok_or_else(|| invalid_enum(5, &tier_str))?;
    let created_at = parse_ts(&created_str).map_err(|e| conversion_error(7, e))?;
    let updated_at = parse_ts(&updated_str).map_err(|e| conversion_error(8, e))?;

    Ok(User {
        id,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        role,
        subscription,
        is_active: row.get(6)?,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn sample_user(name: &str) -> User {
        let now = now_micros();
        User {
            id: UserId::new(),
            email: format!("{name}@example.com"),
            username: name.to_string(),
            password_hash: "00$00".to_string(),
            role: Role::Standard,
            subscription: SubscriptionTier::Free,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user("alice");
        db.insert_user(&user).unwrap();

        assert_eq!(db.get_user(user.id).unwrap(), user);
        assert_eq!(db.get_user_by_email("alice@example.com").unwrap().id, user.id);
        assert_eq!(db.get_user_by_username("alice").unwrap().id, user.id);
        assert!(db.get_user_by_email("nobody@example.com").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&sample_user("alice")).unwrap();

        let mut clash = sample_user("alice2");
        clash.email = "alice@example.com".into();
        match db.insert_user(&clash) {
            Err(StoreError::Conflict(column)) => assert_eq!(column, "email"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_change_tier_and_role() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user("bob");
        db.insert_user(&user).unwrap();

        assert!(db.set_subscription(user.id, SubscriptionTier::Premium).unwrap());
        assert!(db.set_role(user.id, Role::Admin).unwrap());

        let reloaded = db.get_user(user.id).unwrap();
        assert_eq!(reloaded.subscription, SubscriptionTier::Premium);
        assert_eq!(reloaded.role, Role::Admin);
        assert!(!db.set_role(UserId::new(), Role::Guest).unwrap());
    }
}
