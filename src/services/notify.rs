use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::models::{AppState, ChannelCommand, ClientSender, CompletionEvent, RequestStatus};

/// Binds a client_id to a live push connection. At most one binding per
/// client_id; re-registration replaces the previous one.
pub async fn register_client(
    state: &Arc<RwLock<AppState>>,
    client_id: &str,
    connection_id: u64,
    sender: ClientSender,
) {
    let mut state = state.write().await;
    state
        .clients
        .insert(client_id.to_string(), (connection_id, sender));
}

/// Drops bindings owned by a closing connection. A client that already
/// re-registered over a newer connection keeps its binding.
pub async fn unregister_connection(state: &Arc<RwLock<AppState>>, connection_id: u64) {
    let mut state = state.write().await;
    state.clients.retain(|_, bound| bound.0 != connection_id);
}

pub async fn next_connection_id(state: &Arc<RwLock<AppState>>) -> u64 {
    let mut state = state.write().await;
    state.next_connection_id += 1;
    state.next_connection_id
}

/// Best-effort delivery of a terminal-state event. A dropped channel loses
/// the event; status polling stays the reliable path.
pub async fn notify_client(
    state: &Arc<RwLock<AppState>>,
    client_id: Option<&str>,
    uuid: Uuid,
    status: &RequestStatus,
) {
    let client_id = match client_id {
        Some(client_id) => client_id,
        None => return,
    };

    let state = state.read().await;
    if let Some((_, sender)) = state.clients.get(client_id) {
        let event = CompletionEvent::new(uuid, status);
        if let Ok(text) = serde_json::to_string(&event) {
            if sender.send(Message::text(text)).is_err() {
                debug!(%uuid, client_id, "push channel closed before delivery");
            }
        }
    }
}

/// Runs one push-channel connection: forwards queued events to the socket and
/// handles `register` commands from the client.
pub async fn client_channel(socket: WebSocket, state: Arc<RwLock<AppState>>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = next_connection_id(&state).await;

    while let Some(Ok(message)) = ws_rx.next().await {
        let text = match message.to_str() {
            Ok(text) => text,
            Err(_) => continue,
        };
        let command: ChannelCommand = match serde_json::from_str(text) {
            Ok(command) => command,
            Err(_) => continue,
        };

        if command.event == "register" {
            if let Some(client_id) = command.client_id {
                register_client(&state, &client_id, connection_id, tx.clone()).await;
                info!(%client_id, connection_id, "push client registered");
                let ack = json!({ "event": "registered", "client_id": client_id });
                let _ = tx.send(Message::text(ack.to_string()));
            }
        }
    }

    unregister_connection(&state, connection_id).await;
    debug!(connection_id, "push channel closed");
}
