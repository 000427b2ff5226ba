//! Post service — CRUD, image attachment and listing.
//!
//! DESIGN
//! ======
//! A post is always returned with its author and its images ordered by
//! `order`. Images are aggregated in SQL as a JSON array so a page of posts
//! is one query. Creation runs inside a transaction: the post row, each image
//! row and the final re-read share one connection, and any failure leaves no
//! post behind.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, PgPool, Row};
use time::OffsetDateTime;
use validator::Validate;

use crate::frame::ErrorCode;
use crate::pagination::{self, Field, FieldKind, Paginate, Paginated, PaginationError, PaginationQuery};
use crate::services::images::{self, Image, ImageError, PublicDirs, StoredImage};
use crate::services::users::User;
use crate::transaction::transactional;

/// Posts created by [`generate_posts`].
pub const GENERATED_POST_COUNT: i64 = 100;

const POST_SELECT: &str = r#"p.id, p.title, p.content, p.like_count, p.comment_count, p.created_at, p.updated_at,
    u.id AS author_id, u.nickname AS author_nickname, u.email AS author_email, u.role AS author_role,
    u.created_at AS author_created_at, u.updated_at AS author_updated_at,
    COALESCE((
        SELECT json_agg(json_build_object(
            'id', i.id, 'order', i."order", 'type', i.type, 'path', i.path,
            'createdAt', i.created_at, 'updatedAt', i.updated_at
        ) ORDER BY i."order", i.id)
        FROM images i WHERE i.post_id = p.id
    ), '[]'::json) AS images"#;

const POST_FROM: &str = "posts p JOIN users u ON u.id = p.author_id";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("post not found: {0}")]
    NotFound(i64),
    #[error("only the author or an admin may change post {0}")]
    Forbidden(i64),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for PostError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_POST_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::Image(err) => err.error_code(),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub author: User,
    pub title: String,
    pub content: String,
    pub like_count: i32,
    pub comment_count: i32,
    pub images: Vec<Image>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl FromRow<'_, PgRow> for Post {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let Json(images): Json<Vec<StoredImage>> = row.try_get("images")?;
        Ok(Self {
            id: row.try_get("id")?,
            author: User::from_prefixed_row(row, "author_")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            like_count: row.try_get("like_count")?,
            comment_count: row.try_get("comment_count")?,
            images: images.into_iter().map(Image::from).collect(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Paginate for Post {
    const SELECT: &'static str = POST_SELECT;
    const FROM: &'static str = POST_FROM;
    const ID_COLUMN: &'static str = "p.id";
    const CREATED_AT_COLUMN: &'static str = "p.created_at";

    fn field(name: &str) -> Option<Field> {
        Some(match name {
            "id" => Field::new("p.id", FieldKind::Int),
            "title" => Field::new("p.title", FieldKind::Text),
            "content" => Field::new("p.content", FieldKind::Text),
            "likeCount" => Field::new("p.like_count", FieldKind::Int),
            "commentCount" => Field::new("p.comment_count", FieldKind::Int),
            "authorId" => Field::new("p.author_id", FieldKind::Int),
            "createdAt" => Field::new("p.created_at", FieldKind::Timestamp),
            "updatedAt" => Field::new("p.updated_at", FieldKind::Timestamp),
            _ => return None,
        })
    }

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePostDto {
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
    /// Temp upload file names, attached in this order.
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePostDto {
    pub title: Option<String>,
    pub content: Option<String>,
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// Returns a pagination error for bad filters or a database error.
pub async fn paginate_posts(
    pool: &PgPool,
    query: &PaginationQuery,
    base_url: &str,
) -> Result<Paginated<Post>, PaginationError> {
    pagination::paginate::<Post>(pool, query, &[], base_url, "posts").await
}

/// Load one post with author and images.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_post_by_id<'e>(executor: impl PgExecutor<'e>, post_id: i64) -> Result<Option<Post>, sqlx::Error> {
    sqlx::query_as::<_, Post>(&format!("SELECT {POST_SELECT} FROM {POST_FROM} WHERE p.id = $1"))
        .bind(post_id)
        .fetch_optional(executor)
        .await
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn check_post_exists_by_id(pool: &PgPool, post_id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
        .bind(post_id)
        .fetch_one(pool)
        .await
}

async fn load_author_id(pool: &PgPool, post_id: i64) -> Result<i64, PostError> {
    sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PostError::NotFound(post_id))
}

async fn ensure_can_modify(pool: &PgPool, post_id: i64, user: &User) -> Result<(), PostError> {
    let author_id = load_author_id(pool, post_id).await?;
    if !user.can_modify(author_id) {
        return Err(PostError::Forbidden(post_id));
    }
    Ok(())
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Insert a post and attach its images in one transaction.
///
/// # Errors
///
/// Returns `Image(FileMissing | InvalidFileName)` for a bad image reference,
/// or a database/I/O error. Nothing is committed on error.
pub async fn create_post(pool: &PgPool, dirs: &PublicDirs, author_id: i64, dto: CreatePostDto) -> Result<Post, PostError> {
    let dirs = dirs.clone();
    let post = transactional(pool, move |conn| {
        async move {
            let post_id: i64 =
                sqlx::query_scalar("INSERT INTO posts (author_id, title, content) VALUES ($1, $2, $3) RETURNING id")
                    .bind(author_id)
                    .bind(&dto.title)
                    .bind(&dto.content)
                    .fetch_one(&mut *conn)
                    .await?;

            for (order, file_name) in (0_i32..).zip(&dto.images) {
                images::create_post_image(&mut *conn, &dirs, post_id, order, file_name).await?;
            }

            get_post_by_id(&mut *conn, post_id)
                .await?
                .ok_or(PostError::NotFound(post_id))
        }
        .boxed()
    })
    .await?;

    tracing::info!(post_id = post.id, author_id, images = post.images.len(), "post created");
    Ok(post)
}

/// Change title and/or content. Empty strings leave a field unchanged.
///
/// # Errors
///
/// Returns `NotFound`, `Forbidden` if `user` is neither author nor admin, or
/// a database error.
pub async fn update_post(pool: &PgPool, post_id: i64, user: &User, dto: UpdatePostDto) -> Result<Post, PostError> {
    ensure_can_modify(pool, post_id, user).await?;

    let title = dto.title.filter(|t| !t.is_empty());
    let content = dto.content.filter(|c| !c.is_empty());
    sqlx::query(
        "UPDATE posts
         SET title = COALESCE($2, title), content = COALESCE($3, content), updated_at = now()
         WHERE id = $1",
    )
    .bind(post_id)
    .bind(title)
    .bind(content)
    .execute(pool)
    .await?;

    get_post_by_id(pool, post_id)
        .await?
        .ok_or(PostError::NotFound(post_id))
}

/// Delete a post; images and comments cascade. Returns the deleted id.
///
/// # Errors
///
/// Returns `NotFound`, `Forbidden`, or a database error.
pub async fn delete_post(pool: &PgPool, post_id: i64, user: &User) -> Result<i64, PostError> {
    ensure_can_modify(pool, post_id, user).await?;

    let result = sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(PostError::NotFound(post_id));
    }
    tracing::info!(post_id, user_id = user.id, "post deleted");
    Ok(post_id)
}

/// Seed [`GENERATED_POST_COUNT`] placeholder posts for `author_id`.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn generate_posts(pool: &PgPool, author_id: i64) -> Result<(), PostError> {
    sqlx::query(
        "INSERT INTO posts (author_id, title, content)
         SELECT $1, 'generated post title ' || i, 'generated post content ' || i
         FROM generate_series(0, $2 - 1) AS i",
    )
    .bind(author_id)
    .bind(GENERATED_POST_COUNT)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "posts_test.rs"]
mod tests;
