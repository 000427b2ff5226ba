//! Domain services used by the HTTP routes and the chat gateway.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence so route handlers can
//! stay focused on extraction, auth plumbing and status mapping.

pub mod auth;
pub mod chats;
pub mod comments;
pub mod images;
pub mod posts;
pub mod rooms;
pub mod uploads;
pub mod users;
