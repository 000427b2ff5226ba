//! Chat rooms and their messages.
//!
//! DESIGN
//! ======
//! A chat is a set of users joined through `chat_users`. Members are
//! aggregated into a JSON array in the select so a page of chats stays one
//! query. Messages always carry their author's public profile.
//!
//! Live delivery is not handled here; see `services::rooms`.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, PgPool, Row};
use time::OffsetDateTime;

use crate::frame::ErrorCode;
use crate::pagination::{self, Field, FieldKind, Paginate, Paginated, PaginationError, PaginationQuery};
use crate::services::users::User;
use crate::transaction::transactional;

const CHAT_SELECT: &str = "ch.id, ch.created_at, ch.updated_at,
    COALESCE((
        SELECT json_agg(json_build_object(
            'id', u.id, 'nickname', u.nickname, 'email', u.email, 'role', u.role,
            'createdAt', u.created_at, 'updatedAt', u.updated_at
        ) ORDER BY u.id)
        FROM chat_users cu JOIN users u ON u.id = cu.user_id
        WHERE cu.chat_id = ch.id
    ), '[]'::json) AS users";

const CHAT_FROM: &str = "chats ch";

const MESSAGE_SELECT: &str = "m.id, m.chat_id, m.message, m.created_at, m.updated_at,
    u.id AS author_id, u.nickname AS author_nickname, u.email AS author_email, u.role AS author_role,
    u.created_at AS author_created_at, u.updated_at AS author_updated_at";

const MESSAGE_FROM: &str = "messages m JOIN users u ON u.id = m.author_id";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unknown chat id")]
    NotFound(i64),
    #[error("a chat needs at least one user")]
    NoUsers,
    #[error("user does not exist: {0}")]
    UnknownUser(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CHAT_NOT_FOUND",
            Self::NoUsers => "E_CHAT_NO_USERS",
            Self::UnknownUser(_) => "E_USER_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: i64,
    pub users: Vec<User>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FromRow<'_, PgRow> for Chat {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let Json(users): Json<Vec<User>> = row.try_get("users")?;
        Ok(Self {
            id: row.try_get("id")?,
            users,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Paginate for Chat {
    const SELECT: &'static str = CHAT_SELECT;
    const FROM: &'static str = CHAT_FROM;
    const ID_COLUMN: &'static str = "ch.id";
    const CREATED_AT_COLUMN: &'static str = "ch.created_at";

    fn field(name: &str) -> Option<Field> {
        Some(match name {
            "id" => Field::new("ch.id", FieldKind::Int),
            "createdAt" => Field::new("ch.created_at", FieldKind::Timestamp),
            "updatedAt" => Field::new("ch.updated_at", FieldKind::Timestamp),
            _ => return None,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub author: User,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FromRow<'_, PgRow> for Message {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            author: User::from_prefixed_row(row, "author_")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Paginate for Message {
    const SELECT: &'static str = MESSAGE_SELECT;
    const FROM: &'static str = MESSAGE_FROM;
    const ID_COLUMN: &'static str = "m.id";
    const CREATED_AT_COLUMN: &'static str = "m.created_at";

    fn field(name: &str) -> Option<Field> {
        Some(match name {
            "id" => Field::new("m.id", FieldKind::Int),
            "message" => Field::new("m.message", FieldKind::Text),
            "authorId" => Field::new("m.author_id", FieldKind::Int),
            "createdAt" => Field::new("m.created_at", FieldKind::Timestamp),
            _ => return None,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }
}

/// `chat:create` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatDto {
    pub user_ids: Vec<i64>,
}

/// `chat:enter` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterChatDto {
    pub chat_ids: Vec<i64>,
}

/// `chat:send` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageDto {
    pub chat_id: i64,
    pub message: String,
}

// =============================================================================
// CHATS
// =============================================================================

/// Create a chat with the given members. Duplicate ids collapse.
///
/// # Errors
///
/// Returns `NoUsers` for an empty list, `UnknownUser` naming the first id
/// with no account, or a database error. Nothing is committed on error.
pub async fn create_chat(pool: &PgPool, user_ids: &[i64]) -> Result<Chat, ChatError> {
    let mut user_ids = user_ids.to_vec();
    user_ids.sort_unstable();
    user_ids.dedup();
    if user_ids.is_empty() {
        return Err(ChatError::NoUsers);
    }

    let chat = transactional(pool, move |conn| {
        async move {
            let known: Vec<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ANY($1) ORDER BY id")
                .bind(&user_ids)
                .fetch_all(&mut *conn)
                .await?;
            if let Some(missing) = user_ids.iter().find(|id| !known.contains(id)) {
                return Err(ChatError::UnknownUser(*missing));
            }

            let chat_id: i64 = sqlx::query_scalar("INSERT INTO chats DEFAULT VALUES RETURNING id")
                .fetch_one(&mut *conn)
                .await?;

            sqlx::query("INSERT INTO chat_users (chat_id, user_id) SELECT $1, unnest($2::bigint[])")
                .bind(chat_id)
                .bind(&user_ids)
                .execute(&mut *conn)
                .await?;

            get_chat_by_id(&mut *conn, chat_id)
                .await?
                .ok_or(ChatError::NotFound(chat_id))
        }
        .boxed()
    })
    .await?;

    tracing::info!(chat_id = chat.id, members = chat.users.len(), "chat created");
    Ok(chat)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_chat_by_id<'e>(executor: impl PgExecutor<'e>, chat_id: i64) -> Result<Option<Chat>, sqlx::Error> {
    sqlx::query_as::<_, Chat>(&format!("SELECT {CHAT_SELECT} FROM {CHAT_FROM} WHERE ch.id = $1"))
        .bind(chat_id)
        .fetch_optional(executor)
        .await
}

/// True iff every id names an existing chat. An empty list is `false`.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn check_if_chat_exists(pool: &PgPool, chat_ids: &[i64]) -> Result<bool, ChatError> {
    let mut chat_ids = chat_ids.to_vec();
    chat_ids.sort_unstable();
    chat_ids.dedup();
    if chat_ids.is_empty() {
        return Ok(false);
    }

    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats WHERE id = ANY($1)")
        .bind(&chat_ids)
        .fetch_one(pool)
        .await?;
    Ok(usize::try_from(found).is_ok_and(|found| found == chat_ids.len()))
}

/// # Errors
///
/// Returns a pagination error for bad filters or a database error.
pub async fn paginate_chats(
    pool: &PgPool,
    query: &PaginationQuery,
    base_url: &str,
) -> Result<Paginated<Chat>, PaginationError> {
    pagination::paginate::<Chat>(pool, query, &[], base_url, "chats").await
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Store a message and return it with its author.
///
/// # Errors
///
/// Returns `NotFound` when the chat does not exist, or a database error.
pub async fn create_message(pool: &PgPool, chat_id: i64, author_id: i64, message: &str) -> Result<Message, ChatError> {
    if !check_if_chat_exists(pool, &[chat_id]).await? {
        return Err(ChatError::NotFound(chat_id));
    }

    let message = sqlx::query_as::<_, Message>(&format!(
        "WITH m AS (
            INSERT INTO messages (chat_id, author_id, message) VALUES ($1, $2, $3) RETURNING *
         )
         SELECT {MESSAGE_SELECT} FROM m JOIN users u ON u.id = m.author_id"
    ))
    .bind(chat_id)
    .bind(author_id)
    .bind(message)
    .fetch_one(pool)
    .await?;

    tracing::debug!(chat_id, message_id = message.id, author_id, "message stored");
    Ok(message)
}

/// # Errors
///
/// Returns a pagination error for bad filters or a database error.
pub async fn paginate_messages(
    pool: &PgPool,
    chat_id: i64,
    query: &PaginationQuery,
    base_url: &str,
) -> Result<Paginated<Message>, PaginationError> {
    let path = format!("chats/{chat_id}/messages");
    pagination::paginate::<Message>(pool, query, &[("m.chat_id", chat_id)], base_url, &path).await
}

#[cfg(test)]
#[path = "chats_test.rs"]
mod tests;
