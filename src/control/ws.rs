//! Server-push-only status feed (spec §6: "broadcast via WebSocket on
//! connect and per controller tick"). Unlike the teacher's bidirectional
//! JSON-RPC transport (`ipc/mod.rs`), clients never send frames here — the
//! socket only ever carries outbound status snapshots.

use crate::engine::Engine;
use crate::status;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::debug;

pub async fn status_feed(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<Engine>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

async fn handle_socket(mut socket: WebSocket, engine: Arc<Engine>) {
    let initial = match engine.last_status.read().await.clone() {
        Some(s) => s,
        None => {
            let cfg = engine.config.snapshot().await;
            status::build_idle_snapshot(&engine, &cfg).await
        }
    };
    if let Ok(text) = serde_json::to_string(&initial) {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut rx = engine.broadcaster.subscribe();
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status feed subscriber lagged, continuing");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                // Push-only feed: any inbound frame (including the close
                // handshake) just tells us the client is gone.
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}
