//! # snyc-shared
//!
//! Types and primitives shared by the Snyc store and server crates:
//! identifiers, the note access rule, content encryption, signed access
//! tokens, password hashing, the collaboration wire protocol and the
//! task vocabulary.

pub mod access;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod password;
pub mod protocol;
pub mod task;
pub mod token;
pub mod types;

pub use access::{can_access, NoteAcl};
pub use task::{Priority, Recurrence};
pub use types::{NoteId, Principal, Role, SubscriptionTier, UserId};
