//! Transport WebSocket handler.
//!
//! `/ws/relay` is the bidirectional channel to the voice relay transport.
//! Inbound text frames are parsed as [`TransportEvent`]s and dispatched
//! through the session registry; outbound relay messages are pumped from the
//! session's channel back onto the socket. The first `setup` frame binds the
//! connection to a session (creating it, or reconnecting a suspended one
//! with the same id); a socket close suspends the session rather than ending
//! it, so the caller can resume within the grace period.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use voxrelay_types::event::{RelayMessage, TransportEvent};
use voxrelay_types::session::SessionId;

use crate::state::AppState;

/// Capacity of the per-connection outbound channel.
const OUTBOUND_CAPACITY: usize = 64;

/// Upgrade an HTTP request to the transport WebSocket.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_relay(socket, state))
}

/// Core transport connection loop.
///
/// Uses `tokio::select!` to multiplex between the session's outbound channel
/// and inbound frames from the transport, keeping both directions in a
/// single task.
async fn handle_relay(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<RelayMessage>(OUTBOUND_CAPACITY);
    let mut session_id: Option<SessionId> = None;

    loop {
        tokio::select! {
            // --- Branch 1: pump session output to the transport ---
            outbound = out_rx.recv() => {
                match outbound {
                    Some(message) => {
                        match serde_json::to_string(&message) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!("failed to serialize relay message: {err}");
                            }
                        }
                    }
                    // We hold a sender ourselves, so this is unreachable in
                    // practice; treat it as a closed connection anyway.
                    None => break,
                }
            }

            // --- Branch 2: process inbound transport frames ---
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &state, &mut session_id, &out_tx);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("websocket receive error: {err}");
                        break;
                    }
                    // Binary and ping/pong protocol frames are handled by axum.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Socket gone: suspend rather than end, the caller may reconnect.
    if let Some(id) = session_id {
        if let Err(err) = state.registry.disconnect(&id) {
            tracing::debug!(session_id = %id, %err, "disconnect after socket close");
        }
    }
    tracing::debug!("relay connection closed");
}

/// Parse and dispatch a single inbound frame.
///
/// Malformed frames are logged and ignored; session state is never touched
/// by garbage input.
fn handle_frame(
    text: &str,
    state: &AppState,
    session_id: &mut Option<SessionId>,
    out_tx: &mpsc::Sender<RelayMessage>,
) {
    let event: TransportEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(raw = %text, error = %err, "ignoring malformed transport frame");
            return;
        }
    };

    match event {
        TransportEvent::Setup(info) => match state.registry.attach(info, out_tx.clone()) {
            Ok(id) => {
                tracing::info!(session_id = %id, "transport bound to session");
                *session_id = Some(id);
            }
            Err(err) => {
                tracing::warn!(%err, "setup rejected");
            }
        },
        event => match session_id {
            Some(id) => {
                if let Err(err) = state.registry.dispatch(id, event) {
                    tracing::warn!(session_id = %id, %err, "transport event dropped");
                }
            }
            None => {
                tracing::warn!(kind = event.kind(), "event before setup ignored");
            }
        },
    }
}
