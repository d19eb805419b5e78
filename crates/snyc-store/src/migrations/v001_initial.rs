//! v001 -- Initial schema creation.
//!
//! Creates `users`, `notes` and the `note_collaborators` join table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    email         TEXT NOT NULL UNIQUE,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,               -- bcrypt, modular-crypt format
    role          TEXT NOT NULL DEFAULT 'standard',
    subscription  TEXT NOT NULL DEFAULT 'free',
    is_active     INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1
    created_at    TEXT NOT NULL,               -- RFC-3339, microseconds, UTC
    updated_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Notes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notes (
    id           TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    title        TEXT NOT NULL,
    content      TEXT NOT NULL,                -- plaintext or base64 ciphertext
    is_encrypted INTEGER NOT NULL DEFAULT 0,
    parent_id    TEXT,                         -- nullable FK -> notes(id), set once
    owner_id     TEXT NOT NULL,                -- FK -> users(id)
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (parent_id) REFERENCES notes(id) ON DELETE CASCADE,
    FOREIGN KEY (owner_id)  REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id);
CREATE INDEX IF NOT EXISTS idx_notes_parent ON notes(parent_id);

-- ----------------------------------------------------------------
-- Note collaborators
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS note_collaborators (
    note_id  TEXT NOT NULL,
    user_id  TEXT NOT NULL,
    added_at TEXT NOT NULL,

    PRIMARY KEY (note_id, user_id),
    FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_note_collaborators_user ON note_collaborators(user_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
