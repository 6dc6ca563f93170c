//! WebSocket endpoints: the per-user notification socket and the per-chat
//! message socket.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hearth_shared::constants::CONNECTION_BUFFER;
use hearth_shared::identity::Identity;

use crate::api::AppState;
use crate::connection::{ConnectionHandle, ConnectionOutbox};
use crate::error::ServerError;
use crate::hub::PeerKey;
use crate::session::CurrentUser;

/// `GET /api/friends/invites`
pub async fn notifications_socket(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket: WebSocket| {
        let (sink, stream) = socket.split();
        notification_session(sink, stream, state, user)
    })
}

async fn notification_session<Tx, Rx, E>(sink: Tx, stream: Rx, state: AppState, user: Identity)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (handle, outbox) = ConnectionHandle::new(CONNECTION_BUFFER);
    let conn_id = handle.id();

    match state.friends.connect(user.id, handle).await {
        Ok(delivery) if !delivery.is_delivered() => {
            warn!(user = %user.id, "Invite snapshot dropped");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(user = %user.id, error = %e, "Failed to open notification socket");
            return;
        }
    }
    info!(user = %user.id, conn = %conn_id, "Notification socket opened");

    // Clients never send anything meaningful on this socket.
    pump(sink, stream, outbox, state.config.keepalive(), |_| async {}).await;

    state.notifications.unregister(user.id, conn_id).await;
    info!(user = %user.id, conn = %conn_id, "Notification socket closed");
}

#[derive(Debug, Deserialize)]
pub struct ChatSocketQuery {
    /// Per-tab id chosen by the client.
    pub session: Option<String>,
}

/// `GET /api/chats/:chatId/messages`
///
/// Existence and membership are checked before upgrading, so a refused
/// caller never sees any history.
pub async fn chat_socket(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<ChatSocketQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let chat = state.chats.authorize(chat_id, user.id).await?;

    let session = query
        .session
        .filter(|s| !s.trim().is_empty())
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let key = PeerKey::new(user.id, session);

    Ok(ws.on_upgrade(move |socket: WebSocket| {
        let (sink, stream) = socket.split();
        chat_session(sink, stream, state, user, chat.id, key)
    }))
}

async fn chat_session<Tx, Rx, E>(
    sink: Tx,
    stream: Rx,
    state: AppState,
    user: Identity,
    chat_id: Uuid,
    key: PeerKey,
) where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (handle, outbox) = ConnectionHandle::new(CONNECTION_BUFFER);
    let conn_id = handle.id();

    // The chat may have been deleted since the upgrade was authorized.
    match state.chats.join(chat_id, key.clone(), &handle).await {
        Ok(delivery) if !delivery.is_delivered() => {
            warn!(chat = %chat_id, user = %user.id, "History replay dropped");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(chat = %chat_id, user = %user.id, error = %e, "Failed to join chat");
            return;
        }
    }
    drop(handle);

    let peers = state.hub.connection_count(chat_id).await;
    debug!(chat = %chat_id, user = %user.id, session = %key.session, peers, "Chat socket opened");

    let chats = state.chats.clone();
    let sender = user.clone();
    pump(sink, stream, outbox, state.config.keepalive(), move |text| {
        let chats = chats.clone();
        let sender = sender.clone();
        async move {
            if let Err(e) = chats.post_message(chat_id, &sender, &text).await {
                warn!(chat = %chat_id, user = %sender.id, error = %e, "Message rejected");
            }
        }
    })
    .await;

    state.hub.leave(chat_id, &key, conn_id).await;
    debug!(chat = %chat_id, user = %user.id, session = %key.session, "Chat socket closed");
}

/// Shuttle frames between a socket and its outbox until either side closes.
///
/// Sends a ping every `keepalive`; any inbound frame counts as liveness and a
/// peer silent for two intervals is dropped.
async fn pump<Tx, Rx, E, F, Fut>(
    mut sink: Tx,
    mut stream: Rx,
    mut outbox: ConnectionOutbox,
    keepalive: Duration,
    mut on_text: F,
) where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + keepalive, keepalive);
    let mut last_seen = started;

    loop {
        tokio::select! {
            frame = outbox.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!("Connection closed by server");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(msg)) => {
                    last_seen = Instant::now();
                    match msg {
                        Message::Text(text) => on_text(text).await,
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },

            _ = ticker.tick() => {
                if last_seen.elapsed() >= keepalive * 2 {
                    info!("Peer silent for two keep-alive intervals, dropping");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
