//! Per-connection collaboration state machine.
//!
//! `Connecting -> Authenticating -> Joined -> Closed`. Any failure before
//! `Joined` sends one error frame and closes without touching the
//! registry. Once joined, the registry entry is held by a lease that is
//! released on every exit path, including panics and task abort.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use snyc_shared::protocol::{ClientMessage, ServerMessage};
use snyc_shared::{NoteId, Principal};

use super::registry::{ConnectionRegistry, RegistryError};
use crate::auth::Authenticator;
use crate::error::ApiError;
use crate::notes::NoteService;
use crate::premium::check_entitlement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Joined,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    AuthenticationFailed,
    PremiumRequired,
    NoteNotFound,
    AlreadyConnected,
    ClientDisconnected,
    IdleTimeout,
    /// Our own outbound queue is gone; nobody is listening any more.
    TransportClosed,
    Internal,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub reason: CloseReason,
    /// Whether the session ever reached `Joined`.
    pub joined: bool,
    pub updates_applied: usize,
}

/// Everything a session needs, shared by all sessions.
#[derive(Clone)]
pub struct SessionContext {
    pub auth: Authenticator,
    pub notes: NoteService,
    pub registry: ConnectionRegistry,
    pub premium_required: bool,
    pub idle_timeout: Duration,
}

struct Session<'a> {
    ctx: &'a SessionContext,
    note_id: NoteId,
    state: SessionState,
    outbound: mpsc::Sender<ServerMessage>,
}

impl<'a> Session<'a> {
    fn transition(&mut self, next: SessionState) {
        debug!(note = %self.note_id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    /// Send an error frame to this session only. `false` if the transport
    /// is gone.
    async fn send_error(&self, message: String) -> bool {
        self.outbound.send(ServerMessage::error(message)).await.is_ok()
    }

    fn close(mut self, reason: CloseReason, joined: bool, updates_applied: usize) -> SessionOutcome {
        self.transition(SessionState::Closed);
        SessionOutcome {
            state: self.state,
            reason,
            joined,
            updates_applied,
        }
    }

    async fn reject(self, reason: CloseReason, message: String) -> SessionOutcome {
        info!(note = %self.note_id, ?reason, "Collaboration session rejected");
        self.send_error(message).await;
        self.close(reason, false, 0)
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<Principal, (CloseReason, String)> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or((CloseReason::AuthenticationFailed, "Not authenticated".to_string()))?;

        let principal = self
            .ctx
            .auth
            .resolve(token)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized(_) => (CloseReason::AuthenticationFailed, e.client_message()),
                other => (CloseReason::Internal, other.client_message()),
            })?;

        check_entitlement(&principal, self.ctx.premium_required)
            .map_err(|e| (CloseReason::PremiumRequired, e.client_message()))?;
        Ok(principal)
    }

    /// Persist, then fan out to everyone else on the note. Failures go
    /// back to this session only and are not fatal.
    async fn apply_update(&self, principal: &Principal, content: String) -> Result<bool, ()> {
        let registry = &self.ctx.registry;
        let sender = principal.id;
        let result = self
            .ctx
            .notes
            .update_content(principal, self.note_id, &content, |note| {
                registry.broadcast(
                    note.id,
                    &ServerMessage::ContentUpdate {
                        content: note.content.clone(),
                    },
                    Some(sender),
                );
            })
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(note = %self.note_id, user = %sender, error = %e, "Content update failed");
                if self.send_error(e.client_message()).await {
                    Ok(false)
                } else {
                    Err(())
                }
            }
        }
    }
}

/// Drive one collaboration session to completion.
///
/// `inbound` yields the client's text frames and ends when the client
/// goes away. Everything for the client, including error frames, is
/// queued on `outbound`.
pub async fn run_session<S>(
    ctx: &SessionContext,
    note_id: NoteId,
    token: Option<&str>,
    mut inbound: S,
    outbound: mpsc::Sender<ServerMessage>,
) -> SessionOutcome
where
    S: Stream<Item = String> + Unpin,
{
    let mut session = Session {
        ctx,
        note_id,
        state: SessionState::Connecting,
        outbound,
    };

    session.transition(SessionState::Authenticating);
    let principal = match session.authenticate(token).await {
        Ok(principal) => principal,
        Err((reason, message)) => return session.reject(reason, message).await,
    };

    match ctx.notes.check_access(&principal, note_id).await {
        Ok(()) => {}
        Err(ApiError::NoteNotFound) => {
            return session
                .reject(CloseReason::NoteNotFound, ApiError::NoteNotFound.client_message())
                .await;
        }
        Err(e) => return session.reject(CloseReason::Internal, e.client_message()).await,
    }

    let _lease = match ctx
        .registry
        .join(note_id, principal.id, session.outbound.clone())
    {
        Ok(lease) => lease,
        Err(e @ RegistryError::AlreadyConnected) => {
            return session
                .reject(CloseReason::AlreadyConnected, e.to_string())
                .await;
        }
    };
    session.transition(SessionState::Joined);

    let mut updates_applied = 0;
    let reason = loop {
        let frame = match tokio::time::timeout(ctx.idle_timeout, inbound.next()).await {
            Err(_) => break CloseReason::IdleTimeout,
            Ok(None) => break CloseReason::ClientDisconnected,
            Ok(Some(frame)) => frame,
        };

        match ClientMessage::parse(&frame) {
            Ok(ClientMessage::ContentUpdate { content }) => {
                match session.apply_update(&principal, content).await {
                    Ok(true) => updates_applied += 1,
                    Ok(false) => {}
                    Err(()) => break CloseReason::TransportClosed,
                }
            }
            Err(e) => {
                debug!(note = %note_id, user = %principal.id, error = %e, "Rejected frame");
                if !session.send_error(e.to_string()).await {
                    break CloseReason::TransportClosed;
                }
            }
        }
    };

    info!(
        note = %note_id,
        user = %principal.id,
        ?reason,
        updates_applied,
        "Collaboration session closed"
    );
    session.close(reason, true, updates_applied)
}
