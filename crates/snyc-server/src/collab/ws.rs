//! WebSocket transport for collaboration sessions.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use snyc_shared::constants::SESSION_OUTBOUND_BUFFER;
use snyc_shared::protocol::ServerMessage;
use snyc_shared::NoteId;

use super::session::{run_session, SessionContext};
use crate::api::{parse_note_id, AppState};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

/// `GET /api/v2/notes/ws/:id?token=...`
pub async fn note_socket(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(params): Query<SocketParams>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let note_id = parse_note_id(&id)?;
    let ctx = state.session_context();
    Ok(ws
        .on_upgrade(move |socket| serve_socket(socket, ctx, note_id, params.token))
        .into_response())
}

async fn serve_socket(
    socket: WebSocket,
    ctx: SessionContext,
    note_id: NoteId,
    token: Option<String>,
) {
    let (mut sink, source) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(SESSION_OUTBOUND_BUFFER);

    // Single writer per socket: drains the session queue, then closes.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message.to_json())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let inbound = Box::pin(stream::unfold(source, |mut source| async move {
        loop {
            match source.next().await? {
                Ok(Message::Text(text)) => return Some((text, source)),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }));

    let outcome = run_session(&ctx, note_id, token.as_deref(), inbound, tx).await;
    debug!(note = %note_id, reason = ?outcome.reason, "Socket session finished");

    // All senders are gone once the session returns, so the writer ends.
    let _ = writer.await;
}
