//! Live-update websocket
//!
//! Server to client only: a `connected` greeting, then one text frame per
//! broadcast change event. Anything the client sends is ignored apart from
//! close.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::hub::{BroadcastHub, Registration};
use crate::AppState;

/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let Registration { id, mut frames } = hub.register().await;
    let (mut sender, mut receiver) = socket.split();

    let welcome = json!({
        "kind": "connected",
        "client_id": id,
        "timestamp": Utc::now(),
    });
    if sender.send(Message::Text(welcome.to_string())).await.is_ok() {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // Pruned by the hub
                    None => break,
                },
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Live client {} socket error: {}", id, e);
                        break;
                    }
                },
            }
        }
    }

    hub.unregister(id).await;
    debug!("Live client {} disconnected", id);
}
