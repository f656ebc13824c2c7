//! WebSocket room transport.
//!
//! Each socket gets a connection id and an outbox. A forward task drains the
//! outbox into the socket; inbound frames are parsed and handed to the room
//! coordinator in the order they arrive. Closing the socket leaves the room.

use crate::SharedState;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::room::{ConnectionId, JoinRequest, MAX_MEMBERS, Outbox};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parley_core::history::{HistoryStore, UserId, UserProfile};
use parley_core::message::Message as ChatMessage;
use parley_core::metrics::ACTIVE_SOCKETS;
use parley_core::{MetricsSink, validation};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `GET /ws` — upgrade to the room protocol.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let connection = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerEvent>();

    let open = state.open_sockets.fetch_add(1, Ordering::Relaxed) + 1;
    state.metrics.set(ACTIVE_SOCKETS, open);
    info!(connection = %connection, "WebSocket connected");

    let forward_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            if ws_send(&mut sink, &event).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_client_frame(&text, connection, &outbox, &state).await,
            Message::Close(_) => break,
            _ => {} // Ignore binary, ping, pong.
        }
    }

    state.rooms.leave(connection);
    forward_task.abort();

    let open = state.open_sockets.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    state.metrics.set(ACTIVE_SOCKETS, open);
    info!(connection = %connection, "WebSocket disconnected");
}

async fn handle_client_frame(
    text: &str,
    connection: ConnectionId,
    outbox: &Outbox,
    state: &SharedState,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection = %connection, error = %e, "Malformed client frame");
            let _ = outbox.send(ServerEvent::error(format!("Invalid message: {e}")));
            return;
        }
    };

    match event {
        ClientEvent::JoinRoom {
            room_id,
            display_name,
        } => {
            let (user_id, history) = participant_for_join(state, &room_id, &display_name).await;
            state.rooms.join(
                connection,
                JoinRequest {
                    room_id,
                    display_name,
                    user_id,
                    history,
                },
                outbox.clone(),
            );
        }
        ClientEvent::ChatMessage { content } => {
            state.rooms.relay(connection, content, outbox.clone());
        }
    }
}

/// Resolve the joiner's identity only when the join can be accepted.
///
/// A bad room id or a room already at capacity is rejected by the
/// coordinator, so no user row is created or touched for it. Two joins racing
/// for the last slot can still both resolve; the coordinator admits one.
pub async fn participant_for_join(
    state: &SharedState,
    room_id: &str,
    display_name: &str,
) -> (Option<UserId>, Vec<ChatMessage>) {
    if validation::validate_room_id(room_id).is_err() {
        return (None, Vec::new());
    }
    let has_room = state
        .rooms
        .room_info(room_id)
        .await
        .is_none_or(|info| info.members.len() < MAX_MEMBERS);
    if !has_room {
        debug!(room = %room_id, "Room is full, skipping history lookup");
        return (None, Vec::new());
    }
    resolve_participant(state.store.as_ref(), display_name).await
}

/// Look up (or create) the participant's user and load their history.
///
/// Storage failures degrade to "no identity" or "no history"; joining never
/// fails because of them.
pub async fn resolve_participant(
    store: &dyn HistoryStore,
    display_name: &str,
) -> (Option<UserId>, Vec<ChatMessage>) {
    if validation::validate_username(display_name).is_err() {
        return (None, Vec::new());
    }

    let user_id = match store
        .get_or_create_user(display_name, &UserProfile::default())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(user = %display_name, error = %e, "Could not resolve user, joining without history");
            return (None, Vec::new());
        }
    };

    match store.get_chat_history(user_id).await {
        Ok(history) => (Some(user_id), history),
        Err(e) => {
            warn!(user_id, error = %e, "Could not load chat history");
            (Some(user_id), Vec::new())
        }
    }
}

/// Serialize a `ServerEvent` and send it over the WebSocket sink.
async fn ws_send(sink: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> Result<(), ()> {
    let json = serde_json::to_string(event).unwrap_or_default();
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
