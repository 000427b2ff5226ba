//! Chat listing routes. Live traffic goes through the websocket in `ws`.

use axum::Json;
use axum::extract::State;

use crate::error::ApiError;
use crate::pagination::{Paginated, PaginationQuery};
use crate::routes::extract::ApiPath;
use crate::services::chats::{self, Chat, ChatError, Message};
use crate::state::AppState;

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound(_) => ApiError::not_found(err.to_string()),
            ChatError::NoUsers | ChatError::UnknownUser(_) => ApiError::bad_request(err.to_string()),
            ChatError::Database(_) => ApiError::internal(&err),
        }
    }
}

/// `GET /chats`
pub async fn list_chats(
    State(state): State<AppState>,
    query: PaginationQuery,
) -> Result<Json<Paginated<Chat>>, ApiError> {
    Ok(Json(chats::paginate_chats(&state.pool, &query, &state.config.base_url()).await?))
}

/// `GET /chats/{id}/messages`
pub async fn list_messages(
    State(state): State<AppState>,
    ApiPath(chat_id): ApiPath<i64>,
    query: PaginationQuery,
) -> Result<Json<Paginated<Message>>, ApiError> {
    if !chats::check_if_chat_exists(&state.pool, &[chat_id]).await? {
        return Err(ChatError::NotFound(chat_id).into());
    }
    let page = chats::paginate_messages(&state.pool, chat_id, &query, &state.config.base_url()).await?;
    Ok(Json(page))
}
