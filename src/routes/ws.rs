//! Chat gateway — websocket frame relay for chat rooms.
//!
//! DESIGN
//! ======
//! The handshake is authenticated with an access token, taken from the
//! `Authorization: Bearer` header or a `token` query parameter for browser
//! clients. On upgrade the socket gets a client id and enters a `select!`
//! loop:
//! - Incoming client frames → parse + dispatch by syscall
//! - Frames pushed by room peers → forward to client
//!
//! Handler functions validate, call services and return an `Outcome`. The
//! dispatch layer owns all outbound concerns: reply to the sender and
//! broadcast to room peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id` and `user_id`
//! 2. `chat:create` / `chat:enter` / `chat:send` → dispatch → Outcome
//! 3. Close → leave every room entered on this socket

use std::collections::{BTreeSet, HashMap};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::frame::{Data, FRAME_CODE, FRAME_MESSAGE, Frame, Status};
use crate::routes::auth::authenticate_bearer;
use crate::services::auth::{self as auth_svc, TokenType};
use crate::services::chats::{self, ChatError, CreateChatDto, CreateMessageDto, EnterChatDto};
use crate::services::rooms;
use crate::state::AppState;

/// Outbound buffer per socket; peers' frames are dropped when it is full.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never send frames directly.
enum Outcome {
    /// Send done+data to the sender only.
    Reply(Data),
    /// Reply to the sender and push a `chat:receive` event to room peers.
    ReplyAndBroadcast { chat_id: i64, reply: Data, broadcast: Data },
}

/// Per-socket state owned by the connection loop.
struct Session {
    client_id: Uuid,
    user_id: i64,
    tx: mpsc::Sender<Frame>,
    joined: BTreeSet<i64>,
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /chats/ws`
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user_id = match authenticate_handshake(&state, &headers, &params).await {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(status = %err.status, message = %err.message, "ws: handshake rejected");
            return err.into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| run_ws(socket, state, user_id)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn authenticate_handshake(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<i64, ApiError> {
    let token = match headers.get(AUTHORIZATION) {
        Some(raw) => {
            let raw = raw.to_str().map_err(|_| ApiError::unauthorized("invalid token"))?;
            auth_svc::extract_token_from_header(raw, true)?
        }
        None => params
            .get("token")
            .map(String::as_str)
            .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?,
    };
    let bearer = authenticate_bearer(state, token, TokenType::Access).await?;
    Ok(bearer.user.id)
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: i64) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);
    let mut session = Session { client_id, user_id, tx: client_tx, joined: BTreeSet::new() };

    let welcome = Frame::event("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id);
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut session, &text).await {
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

    let joined: Vec<i64> = session.joined.into_iter().collect();
    rooms::leave_all(&state, client_id, &joined).await;
    info!(%client_id, user_id, rooms = joined.len(), "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::event("gateway:error", Data::new()).with_data(FRAME_MESSAGE, format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user as `from`.
    req.from = Some(session.user_id);
    info!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.syscall.as_str() {
        "chat:create" => handle_create(state, &req).await,
        "chat:enter" => handle_enter(state, session, &req).await,
        "chat:send" => handle_send(state, session, &req).await,
        other => Err(req.error(format!("unknown syscall: {other}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::ReplyAndBroadcast { chat_id, reply, broadcast }) => {
            let event = Frame::event("chat:receive", broadcast)
                .with_chat_id(chat_id)
                .with_from(session.user_id);
            rooms::broadcast(state, chat_id, &event, Some(session.client_id)).await;
            vec![req.done_with(reply)]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

fn payload<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    let value = serde_json::to_value(&req.data).map_err(|e| req.error(format!("invalid payload: {e}")))?;
    serde_json::from_value(value).map_err(|e| req.error(format!("invalid payload: {e}")))
}

fn data_with(key: &str, value: &impl Serialize) -> Data {
    let mut data = Data::new();
    data.insert(key.into(), serde_json::to_value(value).unwrap_or_default());
    data
}

async fn handle_create(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    let dto: CreateChatDto = payload(req)?;
    let chat = chats::create_chat(&state.pool, &dto.user_ids)
        .await
        .map_err(|e| req.error_from(&e))?;
    Ok(Outcome::Reply(data_with("chat", &chat)))
}

async fn handle_enter(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let dto: EnterChatDto = payload(req)?;
    let exists = chats::check_if_chat_exists(&state.pool, &dto.chat_ids)
        .await
        .map_err(|e| req.error_from(&e))?;
    if !exists {
        let first = dto.chat_ids.first().copied().unwrap_or_default();
        return Err(req.error_from(&ChatError::NotFound(first)));
    }

    for &chat_id in &dto.chat_ids {
        rooms::join(state, chat_id, session.client_id, session.tx.clone()).await;
        session.joined.insert(chat_id);
    }
    Ok(Outcome::Reply(data_with("chatIds", &dto.chat_ids)))
}

async fn handle_send(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let dto: CreateMessageDto = payload(req)?;
    let message = chats::create_message(&state.pool, dto.chat_id, session.user_id, &dto.message)
        .await
        .map_err(|e| req.error_from(&e))?;
    let data = data_with("message", &message);
    Ok(Outcome::ReplyAndBroadcast { chat_id: dto.chat_id, reply: data.clone(), broadcast: data })
}

// =============================================================================
// OUTBOUND
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get(FRAME_CODE).and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get(FRAME_MESSAGE).and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.status.is_terminal() {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    } else {
        debug!(id = %frame.id, syscall = %frame.syscall, chat_id = ?frame.chat_id, "ws: push frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
