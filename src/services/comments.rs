//! Comments on posts.
//!
//! Creating or deleting a comment also moves the parent post's
//! `comment_count`, so both statements share one transaction.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool, Row};
use time::OffsetDateTime;
use validator::Validate;

use crate::frame::ErrorCode;
use crate::pagination::{self, Field, FieldKind, Paginate, Paginated, PaginationError, PaginationQuery};
use crate::services::users::User;
use crate::transaction::transactional;

const COMMENT_SELECT: &str = "c.id, c.post_id, c.comment, c.like_count, c.created_at, c.updated_at,
    u.id AS author_id, u.nickname AS author_nickname, u.email AS author_email, u.role AS author_role,
    u.created_at AS author_created_at, u.updated_at AS author_updated_at";

const COMMENT_FROM: &str = "comments c JOIN users u ON u.id = c.author_id";

#[derive(Debug, thiserror::Error)]
pub enum CommentError {
    #[error("comment not found: {0}")]
    NotFound(i64),
    #[error("only the author or an admin may change comment {0}")]
    Forbidden(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for CommentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_COMMENT_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub comment: String,
    pub like_count: i32,
    pub author: User,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FromRow<'_, PgRow> for Comment {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            post_id: row.try_get("post_id")?,
            comment: row.try_get("comment")?,
            like_count: row.try_get("like_count")?,
            author: User::from_prefixed_row(row, "author_")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Paginate for Comment {
    const SELECT: &'static str = COMMENT_SELECT;
    const FROM: &'static str = COMMENT_FROM;
    const ID_COLUMN: &'static str = "c.id";
    const CREATED_AT_COLUMN: &'static str = "c.created_at";

    fn field(name: &str) -> Option<Field> {
        Some(match name {
            "id" => Field::new("c.id", FieldKind::Int),
            "comment" => Field::new("c.comment", FieldKind::Text),
            "likeCount" => Field::new("c.like_count", FieldKind::Int),
            "createdAt" => Field::new("c.created_at", FieldKind::Timestamp),
            _ => return None,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCommentDto {
    #[validate(length(min = 1, message = "comment must not be empty"))]
    pub comment: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCommentDto {
    #[validate(length(min = 1, message = "comment must not be empty"))]
    pub comment: Option<String>,
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// Returns a pagination error for bad filters or a database error.
pub async fn paginate_comments(
    pool: &PgPool,
    post_id: i64,
    query: &PaginationQuery,
    base_url: &str,
) -> Result<Paginated<Comment>, PaginationError> {
    let path = format!("posts/{post_id}/comments");
    pagination::paginate::<Comment>(pool, query, &[("c.post_id", post_id)], base_url, &path).await
}

/// A comment only resolves under the post it belongs to.
///
/// # Errors
///
/// Returns `NotFound` or a database error.
pub async fn get_comment_by_id<'e>(
    executor: impl PgExecutor<'e>,
    post_id: i64,
    comment_id: i64,
) -> Result<Comment, CommentError> {
    sqlx::query_as::<_, Comment>(&format!(
        "SELECT {COMMENT_SELECT} FROM {COMMENT_FROM} WHERE c.id = $1 AND c.post_id = $2"
    ))
    .bind(comment_id)
    .bind(post_id)
    .fetch_optional(executor)
    .await?
    .ok_or(CommentError::NotFound(comment_id))
}

async fn ensure_can_modify(
    conn: &mut PgConnection,
    post_id: i64,
    comment_id: i64,
    user: &User,
) -> Result<(), CommentError> {
    let author_id: i64 = sqlx::query_scalar("SELECT author_id FROM comments WHERE id = $1 AND post_id = $2 FOR UPDATE")
        .bind(comment_id)
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(CommentError::NotFound(comment_id))?;
    if !user.can_modify(author_id) {
        return Err(CommentError::Forbidden(comment_id));
    }
    Ok(())
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Insert a comment and bump the post's `comment_count`.
///
/// # Errors
///
/// Returns a database error; nothing is committed on error.
pub async fn create_comment(
    pool: &PgPool,
    post_id: i64,
    author_id: i64,
    dto: CreateCommentDto,
) -> Result<Comment, CommentError> {
    let comment = transactional(pool, move |conn| {
        async move {
            let comment_id: i64 = sqlx::query_scalar(
                "INSERT INTO comments (post_id, author_id, comment) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(post_id)
            .bind(author_id)
            .bind(&dto.comment)
            .fetch_one(&mut *conn)
            .await?;

            sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *conn)
                .await?;

            get_comment_by_id(&mut *conn, post_id, comment_id).await
        }
        .boxed()
    })
    .await?;

    tracing::info!(post_id, comment_id = comment.id, author_id, "comment created");
    Ok(comment)
}

/// # Errors
///
/// Returns `NotFound`, `Forbidden` if `user` is neither author nor admin, or
/// a database error.
pub async fn update_comment(
    pool: &PgPool,
    post_id: i64,
    comment_id: i64,
    user: &User,
    dto: UpdateCommentDto,
) -> Result<Comment, CommentError> {
    let user = user.clone();
    transactional(pool, move |conn| {
        async move {
            ensure_can_modify(&mut *conn, post_id, comment_id, &user).await?;

            sqlx::query("UPDATE comments SET comment = COALESCE($2, comment), updated_at = now() WHERE id = $1")
                .bind(comment_id)
                .bind(dto.comment)
                .execute(&mut *conn)
                .await?;

            get_comment_by_id(&mut *conn, post_id, comment_id).await
        }
        .boxed()
    })
    .await
}

/// Delete a comment and decrement the post's `comment_count`. Returns the id.
///
/// # Errors
///
/// Returns `NotFound`, `Forbidden`, or a database error.
pub async fn delete_comment(pool: &PgPool, post_id: i64, comment_id: i64, user: &User) -> Result<i64, CommentError> {
    let actor = user.clone();
    transactional(pool, move |conn| {
        async move {
            ensure_can_modify(&mut *conn, post_id, comment_id, &actor).await?;

            sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(comment_id)
                .execute(&mut *conn)
                .await?;

            sqlx::query("UPDATE posts SET comment_count = GREATEST(comment_count - 1, 0) WHERE id = $1")
                .bind(post_id)
                .execute(&mut *conn)
                .await?;

            Ok::<_, CommentError>(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(post_id, comment_id, user_id = user.id, "comment deleted");
    Ok(comment_id)
}

#[cfg(test)]
#[path = "comments_test.rs"]
mod tests;
