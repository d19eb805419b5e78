use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use snyc_shared::protocol::ServerMessage;
use snyc_shared::{NoteId, UserId};

/// Outbound queue of one live session.
pub type Outbound = mpsc::Sender<ServerMessage>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Already connected to this note")]
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The recipient's queue is full; it is not keeping up.
    QueueFull,
    /// The recipient's writer is gone.
    Closed,
}

/// Outcome of one broadcast. Failures are per recipient and never stop
/// delivery to the others.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(UserId, DeliveryFailure)>,
}

#[derive(Default)]
struct Indices {
    /// note -> user -> channel
    by_note: HashMap<NoteId, HashMap<UserId, Outbound>>,
    /// user -> notes
    by_user: HashMap<UserId, HashSet<NoteId>>,
}

impl Indices {
    fn remove(&mut self, note_id: NoteId, user_id: UserId) -> bool {
        let removed = match self.by_note.get_mut(&note_id) {
            Some(sessions) => {
                let removed = sessions.remove(&user_id).is_some();
                if sessions.is_empty() {
                    self.by_note.remove(&note_id);
                }
                removed
            }
            None => false,
        };

        if let Some(notes) = self.by_user.get_mut(&user_id) {
            notes.remove(&note_id);
            if notes.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        removed
    }
}

/// Process-wide index of live collaboration sessions.
///
/// Both directions live behind one lock, so connect, disconnect and
/// broadcast each observe either all of a concurrent mutation or none of
/// it. The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Indices>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `channel` for (note, user). A pair holds at most one
    /// channel; a second connect is rejected and leaves the first alone.
    pub fn connect(
        &self,
        note_id: NoteId,
        user_id: UserId,
        channel: Outbound,
    ) -> Result<(), RegistryError> {
        let mut indices = self.write();

        let sessions = indices.by_note.entry(note_id).or_default();
        if sessions.contains_key(&user_id) {
            return Err(RegistryError::AlreadyConnected);
        }
        sessions.insert(user_id, channel);
        let participants = sessions.len();
        indices.by_user.entry(user_id).or_default().insert(note_id);

        info!(note = %note_id, user = %user_id, participants, "Collaborator joined");
        Ok(())
    }

    /// Like [`connect`](Self::connect), but the returned lease disconnects
    /// when dropped.
    pub fn join(
        &self,
        note_id: NoteId,
        user_id: UserId,
        channel: Outbound,
    ) -> Result<RegistryLease, RegistryError> {
        self.connect(note_id, user_id, channel.clone())?;
        Ok(RegistryLease {
            registry: self.clone(),
            note_id,
            user_id,
            channel,
        })
    }

    /// Remove (note, user). Absent pairs are a no-op.
    pub fn disconnect(&self, note_id: NoteId, user_id: UserId) {
        if self.write().remove(note_id, user_id) {
            info!(note = %note_id, user = %user_id, "Collaborator left");
        }
    }

    /// Remove (note, user) only if it is still registered with `channel`.
    fn disconnect_channel(&self, note_id: NoteId, user_id: UserId, channel: &Outbound) {
        let mut indices = self.write();
        let owned = indices
            .by_note
            .get(&note_id)
            .and_then(|sessions| sessions.get(&user_id))
            .is_some_and(|registered| registered.same_channel(channel));
        if owned && indices.remove(note_id, user_id) {
            info!(note = %note_id, user = %user_id, "Collaborator left");
        }
    }

    /// Queue `message` for every session on the note except `exclude`.
    pub fn broadcast(
        &self,
        note_id: NoteId,
        message: &ServerMessage,
        exclude: Option<UserId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let indices = self.read();
        let Some(sessions) = indices.by_note.get(&note_id) else {
            return report;
        };

        for (user_id, channel) in sessions {
            if Some(*user_id) == exclude {
                continue;
            }

            match channel.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(note = %note_id, user = %user_id, "Dropping update for slow collaborator");
                    report.failed.push((*user_id, DeliveryFailure::QueueFull));
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(note = %note_id, user = %user_id, "Collaborator channel closed");
                    report.failed.push((*user_id, DeliveryFailure::Closed));
                }
            }
        }

        debug!(
            note = %note_id,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast complete"
        );
        report
    }

    pub fn is_connected(&self, note_id: NoteId, user_id: UserId) -> bool {
        self.read()
            .by_note
            .get(&note_id)
            .is_some_and(|sessions| sessions.contains_key(&user_id))
    }

    /// Users with a live session on the note, sorted.
    pub fn participants(&self, note_id: NoteId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .read()
            .by_note
            .get(&note_id)
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Notes the user has a live session on, sorted.
    pub fn notes_for(&self, user_id: UserId) -> Vec<NoteId> {
        let mut notes: Vec<NoteId> = self
            .read()
            .by_user
            .get(&user_id)
            .map(|notes| notes.iter().copied().collect())
            .unwrap_or_default();
        notes.sort();
        notes
    }

    pub fn session_count(&self) -> usize {
        self.read().by_note.values().map(HashMap::len).sum()
    }

    pub fn note_count(&self) -> usize {
        self.read().by_note.len()
    }
}

/// A registered session. Dropping it disconnects, whatever the reason the
/// owning task stopped.
#[derive(Debug)]
pub struct RegistryLease {
    registry: ConnectionRegistry,
    note_id: NoteId,
    user_id: UserId,
    channel: Outbound,
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        self.registry
            .disconnect_channel(self.note_id, self.user_id, &self.channel);
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.session_count())
            .finish()
    }
}
