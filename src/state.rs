//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the database pool, the parsed config, the JWT signing keys, the
//! public directory layout and the map of live chat rooms. Rooms exist only
//! while at least one socket has entered them.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::Config;
use crate::frame::Frame;
use crate::services::auth::JwtKeys;
use crate::services::images::PublicDirs;

// =============================================================================
// CHAT ROOM
// =============================================================================

/// Sockets currently inside one chat room.
pub struct ChatRoom {
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl ChatRoom {
    #[must_use]
    pub fn new() -> Self {
        Self { clients: HashMap::new() }
    }
}

impl Default for ChatRoom {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtKeys>,
    pub dirs: PublicDirs,
    pub rooms: Arc<RwLock<HashMap<i64, ChatRoom>>>,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt = JwtKeys::new(&config.jwt_secret, config.access_token_ttl_secs, config.refresh_token_ttl_secs);
        let dirs = PublicDirs::new(&config.public_dir);
        Self {
            pool,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            dirs,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_room_new_is_empty() {
        assert!(ChatRoom::new().clients.is_empty());
        assert!(ChatRoom::default().clients.is_empty());
    }

    #[tokio::test]
    async fn app_state_derives_dirs_from_config() {
        let state = test_helpers::test_app_state_in(std::path::Path::new("/srv/public"));
        assert_eq!(state.dirs.temp, std::path::PathBuf::from("/srv/public/temp"));
        assert_eq!(state.dirs.posts, std::path::PathBuf::from("/srv/public/posts"));
        assert!(state.rooms.read().await.is_empty());
    }
}
