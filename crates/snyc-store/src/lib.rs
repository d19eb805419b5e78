//! # snyc-store
//!
//! SQLite persistence for Snyc users, notes and tasks.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every
//! domain model. Note content is stored exactly as handed in; encryption
//! of flagged notes happens one layer up.

pub mod database;
pub mod migrations;
pub mod models;
pub mod notes;
pub mod tasks;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
