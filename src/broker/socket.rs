// WebSocket session for one front-end client
// Inbound frames go to the router; outbound frames (replies and broadcasts)
// arrive through the client's registry channel.

use super::server::AppState;
use crate::error::BrokerError;
use crate::registry::{ClientConnection, ClientId};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

/// Handle client WebSocket upgrades
pub async fn handle_client_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_client_socket(socket, state))
}

async fn handle_client_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let client_id = state.clients.add(ClientConnection::new(tx)).await;
    tracing::info!(client = %client_id, "Client connected");

    // Forward queued frames to the socket, pinging on every heartbeat tick
    let heartbeat_interval = state.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                queued = rx.recv() => {
                    let Some(text) = queued else { break };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client = %client_id, "Sent heartbeat ping");
                }
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let raw = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        let error = BrokerError::MalformedRequest(e.to_string());
                        tracing::warn!(client = %client_id, error = %error, "Rejected binary frame");
                        reply(&recv_state, client_id, &error.to_reply_json()).await;
                        continue;
                    },
                },
                Message::Pong(_) => {
                    tracing::trace!(client = %client_id, "Received pong");
                    continue;
                },
                Message::Close(_) => break,
                Message::Ping(_) => continue,
            };

            if let Some(error_reply) = recv_state.router.handle(&raw) {
                reply(&recv_state, client_id, &error_reply).await;
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.clients.remove(client_id).await;
    tracing::info!(client = %client_id, "Client disconnected");
}

async fn reply(state: &AppState, client_id: ClientId, payload: &str) {
    if !state.clients.send_to(client_id, payload).await {
        tracing::debug!(client = %client_id, "Client gone before reply");
    }
}
