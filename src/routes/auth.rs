//! Auth routes — token rotation, email login/registration, and the guards
//! other routes use to require a signed-in user.

use axum::Json;
use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::extract::ValidJson;
use crate::services::auth::{self as auth_svc, AuthError, RegisterUserDto, TokenPair, TokenType};
use crate::services::users::{self, User, UserError};
use crate::state::AppState;

// =============================================================================
// ERROR MAPPING
// =============================================================================

impl From<UserError> for ApiError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NicknameTaken | UserError::EmailTaken => ApiError::bad_request(err.to_string()),
            UserError::Database(_) => ApiError::internal(&err),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::User(user_err) => user_err.into(),
            AuthError::Hash(_) | AuthError::Sign(_) => ApiError::internal(&err),
            _ => ApiError::unauthorized(err.to_string()),
        }
    }
}

// =============================================================================
// GUARDS
// =============================================================================

fn authorization_header(parts: &Parts) -> Result<&str, AuthError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader)
}

/// `email:password` decoded from an `Authorization: Basic` header. The
/// password is not checked here.
pub struct BasicCredentials {
    pub email: String,
    pub password: String,
}

impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = auth_svc::extract_token_from_header(authorization_header(parts)?, false)?;
        let (email, password) = auth_svc::decode_basic_token(token)?;
        Ok(Self { email, password })
    }
}

/// A verified bearer token of the expected type, plus the user it names.
pub struct BearerUser {
    pub user: User,
    pub token: String,
}

/// Verify a raw bearer token and load its user.
///
/// # Errors
///
/// Returns 401 for a bad token, a token of the wrong type, or a subject with
/// no account.
pub async fn authenticate_bearer(state: &AppState, token: &str, expected: TokenType) -> Result<BearerUser, ApiError> {
    let claims = auth_svc::verify_token(&state.jwt, token)?;
    if claims.token_type != expected {
        return Err(match expected {
            TokenType::Access => AuthError::NotAccessToken,
            TokenType::Refresh => AuthError::NotRefreshToken,
        }
        .into());
    }

    let user_id = claims.user_id().ok_or(AuthError::InvalidToken)?;
    let user = users::get_user_by_id(&state.pool, user_id)
        .await?
        .filter(|user| user.email == claims.email)
        .ok_or(AuthError::UnknownUser)?;
    Ok(BearerUser { user, token: token.to_owned() })
}

async fn bearer_from_parts<S>(parts: &Parts, state: &S, expected: TokenType) -> Result<BearerUser, ApiError>
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    let token = auth_svc::extract_token_from_header(authorization_header(parts)?, true)?;
    authenticate_bearer(&AppState::from_ref(state), token, expected).await
}

/// Requires a valid access token.
pub struct AccessUser(pub BearerUser);

impl<S> FromRequestParts<S> for AccessUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        bearer_from_parts(parts, state, TokenType::Access).await.map(Self)
    }
}

/// Requires a valid refresh token.
pub struct RefreshUser(pub BearerUser);

impl<S> FromRequestParts<S> for RefreshUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        bearer_from_parts(parts, state, TokenType::Refresh).await.map(Self)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub refresh_token: String,
}

/// `POST /auth/token/access`
pub async fn token_access(
    State(state): State<AppState>,
    RefreshUser(bearer): RefreshUser,
) -> Result<Json<AccessTokenResponse>, ApiError> {
    let access_token = auth_svc::rotate_token(&state.jwt, &bearer.token, false)?;
    Ok(Json(AccessTokenResponse { access_token }))
}

/// `POST /auth/token/refresh`
pub async fn token_refresh(
    State(state): State<AppState>,
    RefreshUser(bearer): RefreshUser,
) -> Result<Json<RefreshTokenResponse>, ApiError> {
    let refresh_token = auth_svc::rotate_token(&state.jwt, &bearer.token, true)?;
    Ok(Json(RefreshTokenResponse { refresh_token }))
}

/// `POST /auth/login/email`
pub async fn login_email(
    State(state): State<AppState>,
    credentials: BasicCredentials,
) -> Result<Json<TokenPair>, ApiError> {
    let tokens = auth_svc::login_with_email(&state.pool, &state.jwt, &credentials.email, &credentials.password).await?;
    Ok(Json(tokens))
}

/// `POST /auth/register/email`
pub async fn register_email(
    State(state): State<AppState>,
    ValidJson(dto): ValidJson<RegisterUserDto>,
) -> Result<(StatusCode, Json<TokenPair>), ApiError> {
    let tokens = auth_svc::register_with_email(&state.pool, &state.jwt, state.config.hash_rounds, &dto).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
