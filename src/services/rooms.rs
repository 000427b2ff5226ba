//! Live chat rooms — join, leave and broadcast.
//!
//! DESIGN
//! ======
//! A room is the set of sockets that entered a chat. Rooms are created on
//! first join and dropped once the last socket leaves, so memory tracks only
//! chats with live listeners. Messages are persisted by `services::chats`
//! before they are broadcast here.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::Frame;
use crate::state::{AppState, ChatRoom};

/// Add a socket to a chat room, creating the room if needed.
pub async fn join(state: &AppState, chat_id: i64, client_id: Uuid, tx: mpsc::Sender<Frame>) {
    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(chat_id).or_insert_with(ChatRoom::new);
    room.clients.insert(client_id, tx);
    info!(chat_id, %client_id, clients = room.clients.len(), "client entered chat");
}

/// Remove a socket from every listed room. Empty rooms are evicted.
pub async fn leave_all(state: &AppState, client_id: Uuid, chat_ids: &[i64]) {
    let mut rooms = state.rooms.write().await;
    for chat_id in chat_ids {
        let Some(room) = rooms.get_mut(chat_id) else {
            continue;
        };
        room.clients.remove(&client_id);
        if room.clients.is_empty() {
            rooms.remove(chat_id);
            info!(chat_id, "evicted chat room");
        }
    }
}

/// Send a frame to every socket in a room, optionally excluding one.
pub async fn broadcast(state: &AppState, chat_id: i64, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(&chat_id) else {
        return;
    };

    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: a full or closed channel drops this frame.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
