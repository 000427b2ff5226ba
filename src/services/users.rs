//! User accounts.
//!
//! DESIGN
//! ======
//! `User` is the public shape of an account and never carries the password
//! hash. Login paths that need the hash go through
//! [`get_credentials_by_email`], which returns it alongside the user.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use time::OffsetDateTime;

const USER_COLUMNS: &str = "id, nickname, email, role, created_at, updated_at";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("nickname already exists")]
    NicknameTaken,
    #[error("email already exists")]
    EmailTaken,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for UserError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NicknameTaken => "E_NICKNAME_TAKEN",
            Self::EmailTaken => "E_EMAIL_TAKEN",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    /// Unknown values fall back to `User`.
    #[must_use]
    pub fn from_db(raw: &str) -> Self {
        if raw == "ADMIN" { Self::Admin } else { Self::User }
    }
}

/// Also decoded from `json_build_object` rows when users are aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub nickname: String,
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Authors may change their own content; admins may change anything.
    #[must_use]
    pub fn can_modify(&self, author_id: i64) -> bool {
        self.is_admin() || self.id == author_id
    }

    /// Map a joined row whose user columns carry `prefix` (e.g. `author_id`).
    ///
    /// # Errors
    ///
    /// Returns an error if a column is missing or has the wrong type.
    pub fn from_prefixed_row(row: &PgRow, prefix: &str) -> Result<Self, sqlx::Error> {
        let col = |name: &str| format!("{prefix}{name}");
        let role: String = row.try_get(col("role").as_str())?;
        Ok(Self {
            id: row.try_get(col("id").as_str())?,
            nickname: row.try_get(col("nickname").as_str())?,
            email: row.try_get(col("email").as_str())?,
            role: Role::from_db(&role),
            created_at: row.try_get(col("created_at").as_str())?,
            updated_at: row.try_get(col("updated_at").as_str())?,
        })
    }
}

impl FromRow<'_, PgRow> for User {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Self::from_prefixed_row(row, "")
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Create a user. Nickname uniqueness is checked before email.
///
/// # Errors
///
/// Returns `NicknameTaken` / `EmailTaken` on conflicts, or a database error.
pub async fn create_user(pool: &PgPool, nickname: &str, email: &str, password_hash: &str) -> Result<User, UserError> {
    let nickname_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE nickname = $1)")
        .bind(nickname)
        .fetch_one(pool)
        .await?;
    if nickname_taken {
        return Err(UserError::NicknameTaken);
    }

    let email_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(pool)
        .await?;
    if email_taken {
        return Err(UserError::EmailTaken);
    }

    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (nickname, email, password, role) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
    ))
    .bind(nickname)
    .bind(email)
    .bind(password_hash)
    .bind(Role::default().as_str())
    .fetch_one(pool)
    .await
    .map_err(classify_unique_violation)
}

/// A concurrent insert can still trip the unique constraints after the
/// existence checks pass.
fn classify_unique_violation(err: sqlx::Error) -> UserError {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some("users_nickname_key") => return UserError::NicknameTaken,
            Some("users_email_key") => return UserError::EmailTaken,
            _ => {}
        }
    }
    UserError::Database(err)
}

/// List all users ordered by id.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_all_users(pool: &PgPool) -> Result<Vec<User>, UserError> {
    let users = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
        .fetch_all(pool)
        .await?;
    Ok(users)
}

/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_user_by_id(pool: &PgPool, id: i64) -> Result<Option<User>, UserError> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Look up a user together with the stored bcrypt hash.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn get_credentials_by_email(pool: &PgPool, email: &str) -> Result<Option<(User, String)>, UserError> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS}, password FROM users WHERE email = $1"))
        .bind(email)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let user = User::from_row(&row)?;
    Ok(Some((user, row.try_get("password")?)))
}

#[cfg(test)]
#[path = "users_test.rs"]
mod tests;
