//! Frame — the message envelope spoken on the chat websocket.
//!
//! ARCHITECTURE
//! ============
//! Clients send request frames over the `/chats/ws` socket, the gateway
//! dispatches on `syscall`, and replies flow back as done/error frames.
//! Messages pushed to room members (`chat:receive`) are unsolicited item
//! frames with no parent.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Responses correlate to requests via `parent_id`.
//! - `chat_id` is set on frames scoped to one chat room.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame in a request/response stream.
///
/// Every exchange is `request → item* → done` or `request → error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Item,
    Done,
    Error,
}

impl Status {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default = "now_ms")]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// Id of the user that produced the frame, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    pub syscall: String,
    #[serde(default = "default_status")]
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(0)
}

fn default_status() -> Status {
    Status::Request
}

impl Frame {
    /// Client-side request; the server only answers these.
    #[cfg(test)]
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self::new(syscall, Status::Request, data)
    }

    /// Create an unsolicited item frame (server push with no request).
    pub fn event(syscall: impl Into<String>, data: Data) -> Self {
        Self::new(syscall, Status::Item, data)
    }

    fn new(syscall: impl Into<String>, status: Status, data: Data) -> Self {
        Self { id: Uuid::new_v4(), parent_id: None, ts: now_ms(), chat_id: None, from: None, syscall: syscall.into(), status, data }
    }

    /// Create a done response. Terminal, carries no data.
    #[cfg(test)]
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a done response carrying a payload. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an error response carrying only a message. Terminal.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        self.reply(Status::Error, Data::from([(FRAME_MESSAGE.to_owned(), serde_json::Value::String(message.into()))]))
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let data = Data::from([
            (FRAME_CODE.to_owned(), err.error_code().into()),
            (FRAME_MESSAGE.to_owned(), err.to_string().into()),
            (FRAME_RETRYABLE.to_owned(), err.retryable().into()),
        ]);
        self.reply(Status::Error, data)
    }

    /// Answer this frame. The reply keeps `syscall` and `chat_id` and points
    /// back through `parent_id`; `from` is left unset since the server speaks.
    fn reply(&self, status: Status, data: Data) -> Self {
        let mut frame = Self::new(self.syscall.clone(), status, data);
        frame.parent_id = Some(self.id);
        frame.chat_id = self.chat_id;
        frame
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    #[must_use]
    pub fn with_from(mut self, user_id: i64) -> Self {
        self.from = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
