//! Email/password authentication and JWT issuance.
//!
//! ARCHITECTURE
//! ============
//! Login and registration both end in [`login_user`], which signs an
//! access/refresh token pair. Tokens are HS256 JWTs carrying the user id
//! (`sub`), the email and a `type` claim. Only refresh tokens may be rotated
//! into new tokens; protected routes accept only access tokens.
//!
//! TRADE-OFFS
//! ==========
//! Tokens are stateless: there is no revocation list, so a leaked refresh
//! token stays valid until it expires.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use validator::Validate;

use crate::frame::ErrorCode;
use crate::services::users::{self, User, UserError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("invalid token")]
    InvalidHeader,
    #[error("token expired or invalid")]
    InvalidToken,
    #[error("token rotation requires a refresh token")]
    RotationRequiresRefresh,
    #[error("not an access token")]
    NotAccessToken,
    #[error("not a refresh token")]
    NotRefreshToken,
    #[error("user does not exist")]
    UnknownUser,
    #[error("password does not match")]
    WrongPassword,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token signing failed: {0}")]
    Sign(jsonwebtoken::errors::Error),
    #[error(transparent)]
    User(#[from] UserError),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingHeader | Self::InvalidHeader => "E_INVALID_AUTH_HEADER",
            Self::InvalidToken => "E_INVALID_TOKEN",
            Self::RotationRequiresRefresh | Self::NotAccessToken | Self::NotRefreshToken => "E_WRONG_TOKEN_TYPE",
            Self::UnknownUser | Self::WrongPassword => "E_BAD_CREDENTIALS",
            Self::Hash(_) | Self::Sign(_) => "E_AUTH_INTERNAL",
            Self::User(err) => err.error_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn from_refresh_flag(is_refresh: bool) -> Self {
        if is_refresh { Self::Refresh } else { Self::Access }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a string per the JWT `sub` convention.
    pub sub: String,
    pub email: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterUserDto {
    #[validate(length(min = 1, max = 20, message = "nickname must be 1-20 characters"))]
    pub nickname: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 3, max = 8, message = "password must be 3-8 characters"))]
    pub password: String,
}

// =============================================================================
// KEYS
// =============================================================================

/// HS256 keys plus token lifetimes, built once from config.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

fn now_secs() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(0)
}

impl JwtKeys {
    #[must_use]
    pub fn new(secret: &str, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    fn ttl(&self, token_type: TokenType) -> u64 {
        match token_type {
            TokenType::Access => self.access_ttl_secs,
            TokenType::Refresh => self.refresh_ttl_secs,
        }
    }

    fn encode(&self, sub: &str, email: &str, token_type: TokenType) -> Result<String, AuthError> {
        let iat = now_secs();
        let claims = Claims { sub: sub.to_owned(), email: email.to_owned(), token_type, iat, exp: iat + self.ttl(token_type) };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(AuthError::Sign)
    }
}

// =============================================================================
// TOKENS
// =============================================================================

/// Sign an access (or refresh) token for `user`.
///
/// # Errors
///
/// Returns `Sign` if encoding fails.
pub fn sign_token(keys: &JwtKeys, user: &User, is_refresh: bool) -> Result<String, AuthError> {
    keys.encode(&user.id.to_string(), &user.email, TokenType::from_refresh_flag(is_refresh))
}

/// # Errors
///
/// Returns `Sign` if encoding fails.
pub fn login_user(keys: &JwtKeys, user: &User) -> Result<TokenPair, AuthError> {
    Ok(TokenPair { access_token: sign_token(keys, user, false)?, refresh_token: sign_token(keys, user, true)? })
}

/// Check signature and expiry.
///
/// # Errors
///
/// Returns `InvalidToken` for any decoding failure.
pub fn verify_token(keys: &JwtKeys, token: &str) -> Result<Claims, AuthError> {
    jsonwebtoken::decode::<Claims>(token, &keys.decoding, &keys.validation)
        .map(|data| data.claims)
        .map_err(|err| {
            tracing::debug!(error = %err, "token verification failed");
            AuthError::InvalidToken
        })
}

/// Exchange a refresh token for a new access (or refresh) token.
///
/// # Errors
///
/// Returns `InvalidToken` if verification fails and
/// `RotationRequiresRefresh` if `token` is not a refresh token.
pub fn rotate_token(keys: &JwtKeys, token: &str, is_refresh: bool) -> Result<String, AuthError> {
    let claims = verify_token(keys, token)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AuthError::RotationRequiresRefresh);
    }
    keys.encode(&claims.sub, &claims.email, TokenType::from_refresh_flag(is_refresh))
}

// =============================================================================
// HEADERS
// =============================================================================

/// Split `Bearer <token>` / `Basic <token>` and return the token part.
///
/// # Errors
///
/// Returns `InvalidHeader` unless the header is exactly two space-separated
/// parts with the expected scheme first.
pub fn extract_token_from_header(header: &str, is_bearer: bool) -> Result<&str, AuthError> {
    let scheme = if is_bearer { "Bearer" } else { "Basic" };
    match header.split(' ').collect::<Vec<_>>().as_slice() {
        [prefix, token] if *prefix == scheme => Ok(*token),
        _ => Err(AuthError::InvalidHeader),
    }
}

/// Decode a Basic credential into `(email, password)`.
///
/// # Errors
///
/// Returns `InvalidHeader` if the value is not base64 of `email:password`.
pub fn decode_basic_token(encoded: &str) -> Result<(String, String), AuthError> {
    let bytes = STANDARD.decode(encoded).map_err(|_| AuthError::InvalidHeader)?;
    let decoded = String::from_utf8(bytes).map_err(|_| AuthError::InvalidHeader)?;
    match decoded.split(':').collect::<Vec<_>>().as_slice() {
        [email, password] => Ok(((*email).to_owned(), (*password).to_owned())),
        _ => Err(AuthError::InvalidHeader),
    }
}

// =============================================================================
// PASSWORDS
// =============================================================================

/// Hash a password with bcrypt on the blocking pool.
///
/// # Errors
///
/// Returns `Hash` if bcrypt fails or the blocking task panics.
pub async fn hash_password(password: &str, rounds: u32) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, rounds))
        .await
        .map_err(|err| AuthError::Hash(err.to_string()))?
        .map_err(|err| AuthError::Hash(err.to_string()))
}

async fn verify_password(password: &str, hash: String) -> Result<bool, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| AuthError::Hash(err.to_string()))?
        .map_err(|err| AuthError::Hash(err.to_string()))
}

// =============================================================================
// FLOWS
// =============================================================================

/// Look the user up by email and check the password.
///
/// # Errors
///
/// Returns `UnknownUser` / `WrongPassword` on bad credentials.
pub async fn authenticate_with_email_and_password(pool: &PgPool, email: &str, password: &str) -> Result<User, AuthError> {
    let (user, hash) = users::get_credentials_by_email(pool, email)
        .await?
        .ok_or(AuthError::UnknownUser)?;

    if !verify_password(password, hash).await? {
        return Err(AuthError::WrongPassword);
    }
    Ok(user)
}

/// # Errors
///
/// Returns the authentication error, or `Sign` if token encoding fails.
pub async fn login_with_email(pool: &PgPool, keys: &JwtKeys, email: &str, password: &str) -> Result<TokenPair, AuthError> {
    let user = authenticate_with_email_and_password(pool, email, password).await?;
    tracing::info!(user_id = user.id, "user logged in");
    login_user(keys, &user)
}

/// Create the account and log it in. The DTO is validated by the caller.
///
/// # Errors
///
/// Returns `User(NicknameTaken | EmailTaken)` on conflicts, `Hash` if bcrypt
/// fails, or a database error.
pub async fn register_with_email(
    pool: &PgPool,
    keys: &JwtKeys,
    hash_rounds: u32,
    dto: &RegisterUserDto,
) -> Result<TokenPair, AuthError> {
    let hash = hash_password(&dto.password, hash_rounds).await?;
    let user = users::create_user(pool, &dto.nickname, &dto.email, &hash).await?;
    tracing::info!(user_id = user.id, "user registered");
    login_user(keys, &user)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
