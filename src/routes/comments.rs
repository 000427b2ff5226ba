//! Comment routes, nested under `/posts/{id}/comments`.
//!
//! Every route here runs behind [`post_exists`], so handlers can assume the
//! parent post was present when the request arrived.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::ApiError;
use crate::pagination::{Paginated, PaginationQuery};
use crate::routes::auth::AccessUser;
use crate::routes::extract::{ApiPath, ValidJson};
use crate::services::comments::{self, Comment, CommentError, CreateCommentDto, UpdateCommentDto};
use crate::services::posts;
use crate::state::AppState;

impl From<CommentError> for ApiError {
    fn from(err: CommentError) -> Self {
        match err {
            CommentError::NotFound(_) => ApiError::not_found("comment does not exist"),
            CommentError::Forbidden(_) => ApiError::forbidden(err.to_string()),
            CommentError::Database(_) => ApiError::internal(&err),
        }
    }
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/comments", get(list_comments).post(create_comment))
        .route(
            "/posts/{id}/comments/{comment_id}",
            get(get_comment).patch(update_comment).delete(delete_comment),
        )
        .route_layer(middleware::from_fn_with_state(state, post_exists))
}

#[derive(serde::Deserialize)]
struct PostIdParam {
    id: String,
}

/// 400 for a non-numeric post id, 404 when the post is gone.
async fn post_exists(
    State(state): State<AppState>,
    ApiPath(params): ApiPath<PostIdParam>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let post_id: i64 = params
        .id
        .parse()
        .map_err(|_| ApiError::bad_request("post id must be an integer"))?;
    if !posts::check_post_exists_by_id(&state.pool, post_id).await? {
        return Err(ApiError::not_found("post does not exist"));
    }
    Ok(next.run(request).await)
}

/// `GET /posts/{id}/comments`
pub async fn list_comments(
    State(state): State<AppState>,
    ApiPath(post_id): ApiPath<i64>,
    query: PaginationQuery,
) -> Result<Json<Paginated<Comment>>, ApiError> {
    let page = comments::paginate_comments(&state.pool, post_id, &query, &state.config.base_url()).await?;
    Ok(Json(page))
}

/// `GET /posts/{id}/comments/{comment_id}`
pub async fn get_comment(
    State(state): State<AppState>,
    ApiPath((post_id, comment_id)): ApiPath<(i64, i64)>,
) -> Result<Json<Comment>, ApiError> {
    Ok(Json(comments::get_comment_by_id(&state.pool, post_id, comment_id).await?))
}

/// `POST /posts/{id}/comments`
pub async fn create_comment(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    ApiPath(post_id): ApiPath<i64>,
    ValidJson(dto): ValidJson<CreateCommentDto>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let comment = comments::create_comment(&state.pool, post_id, bearer.user.id, dto).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `PATCH /posts/{id}/comments/{comment_id}`
pub async fn update_comment(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    ApiPath((post_id, comment_id)): ApiPath<(i64, i64)>,
    ValidJson(dto): ValidJson<UpdateCommentDto>,
) -> Result<Json<Comment>, ApiError> {
    Ok(Json(comments::update_comment(&state.pool, post_id, comment_id, &bearer.user, dto).await?))
}

/// `DELETE /posts/{id}/comments/{comment_id}`
pub async fn delete_comment(
    State(state): State<AppState>,
    AccessUser(bearer): AccessUser,
    ApiPath((post_id, comment_id)): ApiPath<(i64, i64)>,
) -> Result<Json<i64>, ApiError> {
    Ok(Json(comments::delete_comment(&state.pool, post_id, comment_id, &bearer.user).await?))
}
