//! WebSocket handler — whiteboard event relay.
//!
//! DESIGN
//! ======
//! The upgrade is authenticated first; a request without a valid token gets
//! `401` and never becomes a socket. On upgrade, a client ID is generated
//! and the connection enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by event
//! - Relayed frames from room peers → forward to client
//!
//! Handler functions validate the inbound payload and return an `Outcome`.
//! The dispatch layer owns all outbound concerns: relay to peers first, then
//! the cache/coalescer/store effect, then any reply to the sender. Relay
//! never waits on storage.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id` and `user_id`
//! 2. `whiteboard:join` → membership + recovery → `whiteboard:init`
//! 3. `update` / `stroke` / `snapshot` / `clear` → relay to peers + apply
//! 4. Close → leave every room

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{
    Data, EVENT_CLEAR, EVENT_CONNECTED, EVENT_ERROR, EVENT_INIT, EVENT_JOIN, EVENT_SNAPSHOT, EVENT_STROKE,
    EVENT_UPDATE, FRAME_CODE, FRAME_MESSAGE, FRAME_WHITEBOARD_ID, Frame,
};
use crate::services;
use crate::services::auth::{AuthError, extract_token};
use crate::state::{AppState, Stroke};

/// Outbound queue depth per client.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send a frame to the sender only.
    Reply(Frame),
    /// Relay `data` to room peers excluding the sender, then apply `effect`.
    Relay { whiteboard_id: Uuid, data: Data, effect: Effect },
    /// Nothing to send.
    Ignore,
}

/// State change applied after a relay.
#[derive(Debug)]
enum Effect {
    Update { delta: Option<Value>, full_state: Option<Value> },
    Stroke(Stroke),
    Snapshot(String),
    Clear,
}

/// Per-socket state owned by the connection task.
struct Connection {
    client_id: Uuid,
    user_id: Uuid,
    tx: mpsc::Sender<Frame>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match extract_token(&params, &headers)
        .ok_or(AuthError::MissingToken)
        .and_then(|token| state.verifier.verify(&token))
    {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(error = %e, "ws: rejected upgrade");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving relayed frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);

    let welcome = Frame::event(EVENT_CONNECTED, Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, %user_id, "ws: client connected");

    let conn = Connection { client_id, user_id, tx: client_tx };

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &conn, text.as_str()).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    let left = state.registry.leave_all(client_id);
    info!(%client_id, rooms = left.len(), "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch directly.
async fn process_inbound_text(state: &AppState, conn: &Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            return vec![];
        }
    };

    // Stamp the authenticated user_id as `from`.
    req.from = Some(conn.user_id.to_string());

    if req.event == EVENT_STROKE {
        debug!(client_id = %conn.client_id, id = %req.id, event = %req.event, "ws: recv frame");
    } else {
        info!(client_id = %conn.client_id, id = %req.id, event = %req.event, "ws: recv frame");
    }

    let outcome = match req.event.as_str() {
        EVENT_JOIN => handle_join(state, conn, &req).await,
        EVENT_UPDATE | EVENT_STROKE | EVENT_SNAPSHOT | EVENT_CLEAR => handle_relay(state, conn, &req),
        _ => {
            warn!(client_id = %conn.client_id, event = %req.event, "ws: unknown event");
            Outcome::Ignore
        }
    };

    // The dispatch layer owns all outbound logic.
    match outcome {
        Outcome::Reply(frame) => vec![frame],
        Outcome::Relay { whiteboard_id, data, effect } => {
            let relay = Frame::event(req.event.clone(), data)
                .with_whiteboard_id(whiteboard_id)
                .with_from(conn.user_id.to_string());
            state.registry.broadcast(whiteboard_id, &relay, Some(conn.client_id));
            apply_effect(state, whiteboard_id, effect);
            vec![]
        }
        Outcome::Ignore => vec![],
    }
}

fn apply_effect(state: &AppState, whiteboard_id: Uuid, effect: Effect) {
    match effect {
        Effect::Update { delta, full_state } => {
            services::whiteboard::apply_update(state, whiteboard_id, delta.as_ref(), full_state.as_ref());
        }
        Effect::Stroke(stroke) => services::whiteboard::apply_stroke(state, whiteboard_id, stroke),
        // Durable writes run detached; failures are logged by the task.
        Effect::Snapshot(image) => {
            services::whiteboard::apply_snapshot(state, whiteboard_id, image);
        }
        Effect::Clear => {
            services::whiteboard::apply_clear(state, whiteboard_id);
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_join(state: &AppState, conn: &Connection, req: &Frame) -> Outcome {
    let Some(whiteboard_id) = req.target_whiteboard() else {
        warn!(client_id = %conn.client_id, "ws: join without whiteboard id");
        return Outcome::Ignore;
    };

    match services::whiteboard::join_whiteboard(state, whiteboard_id, conn.user_id, conn.client_id, conn.tx.clone())
        .await
    {
        Ok(init) => Outcome::Reply(req.reply(EVENT_INIT, init.into_data()).with_whiteboard_id(whiteboard_id)),
        Err(e) => {
            warn!(client_id = %conn.client_id, %whiteboard_id, error = ?e, "ws: join failed");
            Outcome::Reply(req.error_from(&e).with_whiteboard_id(whiteboard_id))
        }
    }
}

/// Validate a relayed event and split it into the peer payload and the
/// effect to apply afterwards.
fn handle_relay(state: &AppState, conn: &Connection, req: &Frame) -> Outcome {
    let Some(whiteboard_id) = req.target_whiteboard() else {
        warn!(client_id = %conn.client_id, event = %req.event, "ws: event without whiteboard id");
        return Outcome::Ignore;
    };
    if !state.registry.contains(whiteboard_id, conn.client_id) {
        debug!(client_id = %conn.client_id, %whiteboard_id, event = %req.event, "ws: event for unjoined whiteboard");
        return Outcome::Ignore;
    }

    let mut data = req.data.clone();
    data.remove(FRAME_WHITEBOARD_ID);

    let effect = match req.event.as_str() {
        EVENT_UPDATE => Effect::Update {
            delta: data.get("delta").cloned(),
            full_state: data.get("fullState").cloned(),
        },
        EVENT_STROKE => {
            let Some(raw) = data.get("stroke") else {
                warn!(client_id = %conn.client_id, %whiteboard_id, "ws: stroke without payload");
                return Outcome::Ignore;
            };
            match serde_json::from_value::<Stroke>(raw.clone()) {
                Ok(stroke) => {
                    data.retain(|key, _| key == "stroke");
                    Effect::Stroke(stroke)
                }
                Err(e) => {
                    warn!(client_id = %conn.client_id, %whiteboard_id, error = %e, "ws: malformed stroke");
                    return Outcome::Ignore;
                }
            }
        }
        EVENT_SNAPSHOT => {
            let Some(image) = data.get("image").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
                warn!(client_id = %conn.client_id, %whiteboard_id, "ws: snapshot without image");
                return Outcome::Ignore;
            };
            let image = image.to_owned();
            data.retain(|key, _| key == "image");
            Effect::Snapshot(image)
        }
        _ => {
            data.clear();
            Effect::Clear
        }
    };

    Outcome::Relay { whiteboard_id, data, effect }
}

// =============================================================================
// SEND
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };

    if frame.event == EVENT_ERROR {
        let code = frame.data.get(FRAME_CODE).and_then(Value::as_str).unwrap_or("-");
        let message = frame.data.get(FRAME_MESSAGE).and_then(Value::as_str).unwrap_or("-");
        warn!(id = %frame.id, event = %frame.event, code, message, "ws: send error frame");
    } else if frame.event == EVENT_STROKE {
        debug!(id = %frame.id, event = %frame.event, "ws: send frame");
    } else {
        info!(id = %frame.id, event = %frame.event, "ws: send frame");
    }

    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
