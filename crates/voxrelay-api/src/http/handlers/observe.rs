//! Observer WebSocket handler.
//!
//! `/ws/observe` streams every [`SessionEvent`] from the broadcast hub to
//! the client as JSON text frames, best-effort. Lagged receivers (a client
//! too slow to keep up) skip events and continue; a slow observer never
//! blocks or affects session processing.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use crate::state::AppState;

/// Keep-alive command accepted from observer clients.
///
/// Unknown or malformed messages are logged and ignored.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ObserverCommand {
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

/// Upgrade an HTTP request to an observer WebSocket.
pub async fn observe_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(socket, state))
}

async fn handle_observer(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut events = state.hub.subscribe();

    loop {
        tokio::select! {
            // --- Branch 1: forward hub events to the observer ---
            event_result = events.recv() => {
                match event_result {
                    Ok(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!("failed to serialize session event: {err}");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "observer lagged, skipping {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // --- Branch 2: process observer commands ---
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ObserverCommand>(&text) {
                            Ok(ObserverCommand::Ping) => {
                                let pong = r#"{"type":"pong"}"#;
                                if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(raw = %text, error = %err, "ignoring observer message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("observer receive error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("observer connection closed");
}
