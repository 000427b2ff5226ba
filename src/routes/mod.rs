//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! REST endpoints, the chat websocket and the `/public` static folder share
//! one Axum router. Every response passes through the request log and CORS
//! layers.

pub mod auth;
pub mod chats;
pub mod comments;
pub mod common;
pub mod extract;
pub mod posts;
pub mod users;
pub mod ws;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::logging;
use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/auth/token/access", post(auth::token_access))
        .route("/auth/token/refresh", post(auth::token_refresh))
        .route("/auth/login/email", post(auth::login_email))
        .route("/auth/register/email", post(auth::register_email))
        .route("/users", get(users::list_users))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/random", post(posts::generate_posts))
        .route(
            "/posts/{id}",
            get(posts::get_post)
                .patch(posts::update_post)
                .delete(posts::delete_post),
        )
        .merge(comments::router(state.clone()))
        .route(
            "/common/image",
            // Size is enforced while streaming the field.
            post(common::upload_image).layer(DefaultBodyLimit::disable()),
        )
        .route("/chats", get(chats::list_chats))
        .route("/chats/{id}/messages", get(chats::list_messages))
        .route("/chats/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .nest_service("/public", ServeDir::new(&state.dirs.root))
        .layer(middleware::from_fn(logging::log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
