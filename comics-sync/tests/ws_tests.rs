//! Live websocket tests over a real listener
//!
//! Tests cover:
//! - The `connected` greeting on upgrade
//! - Change events from API writes reaching an open socket
//! - Hub cleanup once the client closes

use comics_common::config::ServiceConfig;
use comics_sync::store::MemoryStore;
use comics_sync::{build_router, AppState};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test helper: serve the full router on an ephemeral port
async fn serve() -> (TempDir, AppState, SocketAddr) {
    let dir = TempDir::new().expect("Should create temp dir");
    let mut config = ServiceConfig::default();
    config.snapshots.comics = dir.path().join("comic.json");
    config.snapshots.upcoming = dir.path().join("upcomingcomics.json");
    config.media.upload_dir = dir.path().join("uploads");

    let (state, _worker) = AppState::new(Arc::new(MemoryStore::new()), &config, None);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Should bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (dir, state, addr)
}

/// Test helper: next text frame as JSON, skipping control frames
async fn next_json(socket: &mut Socket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).expect("Should parse frame")
                }
                Some(Ok(_)) => continue,
                other => panic!("Socket ended early: {:?}", other),
            }
        }
    })
    .await
    .expect("Should receive a frame in time")
}

async fn wait_for_clients(state: &AppState, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.hub.client_count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Hub should reach expected client count");
}

#[tokio::test]
async fn test_socket_greets_then_streams_changes() {
    let (_dir, state, addr) = serve().await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Should upgrade");

    let greeting = next_json(&mut socket).await;
    assert_eq!(greeting["kind"], "connected");
    assert!(greeting["client_id"].is_u64());
    assert_eq!(state.hub.client_count().await, 1);

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/comics/add", addr))
        .json(&json!({"title": "Live"}))
        .send()
        .await
        .expect("Should reach the API");
    assert!(response.status().is_success());

    let event = next_json(&mut socket).await;
    assert_eq!(event["kind"], "add");
    assert_eq!(event["catalog"], "comics");
    assert_eq!(event["payload"]["title"], "Live");

    socket.close(None).await.expect("Should send close");
    wait_for_clients(&state, 0).await;
}

#[tokio::test]
async fn test_dropped_connection_unregisters() {
    let (_dir, state, addr) = serve().await;
    let (mut first, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    next_json(&mut first).await;
    next_json(&mut second).await;
    wait_for_clients(&state, 2).await;

    // No close frame, just a vanished peer
    drop(first);
    wait_for_clients(&state, 1).await;

    second.send(Message::Ping(Vec::new())).await.unwrap();
    second.close(None).await.unwrap();
    wait_for_clients(&state, 0).await;
}
