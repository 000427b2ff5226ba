//! User listing.

use axum::Json;
use axum::extract::State;

use crate::error::ApiError;
use crate::services::users::{self, User};
use crate::state::AppState;

/// `GET /users` — every account, passwords never included.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(users::get_all_users(&state.pool).await?))
}
