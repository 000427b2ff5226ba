//! Post routes.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::pagination::{Paginated, PaginationQuery};
use crate::routes::auth::AccessUser;
use crate::routes::extract::{ApiPath, ValidJson};
use crate::services::images::ImageError;
use crate::services::posts::{self, CreatePostDto, Post, PostError, UpdatePostDto};
use crate::state::AppState;

impl From<ImageError> for ApiError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::InvalidFileName(_) | ImageError::FileMissing(_) => ApiError::bad_request(err.to_string()),
            ImageError::Io(_) | ImageError::Database(_) => ApiError::internal(&err),
        }
    }
}

impl From<PostError> for ApiError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::NotFound(_) => ApiError::not_found("post does not exist"),
            PostError::Forbidden(_) => ApiError::forbidden(err.to_string()),
            PostError::Image(image_err) => image_err.into(),
            PostError::Database(_) => ApiError::internal(&err),
        }
    }
}

/// `GET /posts`
pub async fn list_posts(
    State(state): State<AppState>,
    query: PaginationQuery,
) -> Result<Json<Paginated<Post>>, ApiError> {
    let page = posts::paginate_posts(&state.pool, &query, &state.config.base_url()).await?;
    Ok(Json(page))
}

/// `GET /posts/{id}`
pub async fn get_post(State(state): State<AppState>, ApiPath(post_id): ApiPath<i64>) -> Result<Json<Post>, ApiError> {
    let post = posts::get_post_by_id(&state.pool, post_id)
        .await?
        .ok_or(PostError::NotFound(post_id))?;
    Ok(Json(post))
}

/// `POST /posts`
pub async fn create_post(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    ValidJson(dto): ValidJson<CreatePostDto>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let post = posts::create_post(&state.pool, &state.dirs, bearer.user.id, dto).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// `PATCH /posts/{id}`
pub async fn update_post(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    ApiPath(post_id): ApiPath<i64>,
    ValidJson(dto): ValidJson<UpdatePostDto>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(posts::update_post(&state.pool, post_id, &bearer.user, dto).await?))
}

/// `DELETE /posts/{id}`
pub async fn delete_post(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    ApiPath(post_id): ApiPath<i64>,
) -> Result<Json<i64>, ApiError> {
    Ok(Json(posts::delete_post(&state.pool, post_id, &bearer.user).await?))
}

/// `POST /posts/random` — seed placeholder posts for the caller.
pub async fn generate_posts(State(state): State<AppState>, AccessUser(bearer): AccessUser) -> Result<Json<bool>, ApiError> {
    posts::generate_posts(&state.pool, bearer.user.id).await?;
    Ok(Json(true))
}
