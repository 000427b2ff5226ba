//! Runtime configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! `.env.dev`, `.env.prod` and `.env` are offered to `dotenvy` in that order
//! before anything reads the environment; the first file found wins and none
//! is required. Parsing goes through a lookup function so tests can feed a
//! plain map instead of mutating process-global state.

use std::path::PathBuf;

use url::Url;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_HASH_ROUNDS: u32 = 10;
pub const DEFAULT_PROTOCOL: &str = "http";
pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 300;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 3600;
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 10_000_000;

const ENV_FILES: [&str; 3] = [".env.dev", ".env.prod", ".env"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub hash_rounds: u32,
    pub protocol: String,
    pub host: String,
    pub public_dir: PathBuf,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub upload_max_bytes: usize,
    /// Run embedded migrations at startup (`DB_SYNCHRONIZE`).
    pub run_migrations: bool,
}

impl Config {
    /// Load `.env` files (if any) and build the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or a value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_env_files();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    ///
    /// Required:
    /// - `JWT_SECRET`
    /// - `DATABASE_URL`, or all of `DB_HOST`, `DB_PORT`, `DB_USERNAME`,
    ///   `DB_PASSWORD`, `DB_DATABASE`
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or a value fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => compose_database_url(&get)?,
        };
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let hash_rounds = parse_or(&get, "HASH_ROUNDS", DEFAULT_HASH_ROUNDS)?;
        if !(4..=31).contains(&hash_rounds) {
            return Err(ConfigError::Invalid { key: "HASH_ROUNDS", value: hash_rounds.to_string() });
        }

        Ok(Self {
            port,
            database_url,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            jwt_secret,
            hash_rounds,
            protocol: get("PROTOCOL").unwrap_or_else(|| DEFAULT_PROTOCOL.to_owned()),
            host: get("HOST").unwrap_or_else(|| format!("localhost:{port}")),
            public_dir: get("PUBLIC_DIR").map_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR), PathBuf::from),
            access_token_ttl_secs: parse_or(&get, "ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TOKEN_TTL_SECS)?,
            refresh_token_ttl_secs: parse_or(&get, "REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TOKEN_TTL_SECS)?,
            upload_max_bytes: parse_or(&get, "UPLOAD_MAX_BYTES", DEFAULT_UPLOAD_MAX_BYTES)?,
            run_migrations: match get("DB_SYNCHRONIZE") {
                Some(raw) => {
                    parse_bool(&raw).ok_or(ConfigError::Invalid { key: "DB_SYNCHRONIZE", value: raw })?
                }
                None => true,
            },
        })
    }

    /// Base URL used for absolute links such as the cursor `next` page.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host)
    }
}

fn load_env_files() {
    for file in ENV_FILES {
        if dotenvy::from_filename(file).is_ok() {
            tracing::debug!(file, "loaded environment file");
            return;
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn compose_database_url(get: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    let host = get("DB_HOST").ok_or(ConfigError::Missing("DATABASE_URL"))?;
    let port: u16 = parse_or(get, "DB_PORT", 5432)?;
    let user = get("DB_USERNAME").ok_or(ConfigError::Missing("DB_USERNAME"))?;
    let password = get("DB_PASSWORD").ok_or(ConfigError::Missing("DB_PASSWORD"))?;
    let database = get("DB_DATABASE").ok_or(ConfigError::Missing("DB_DATABASE"))?;

    // Credentials and database name are percent-encoded by `Url`.
    let mut url = Url::parse(&format!("postgres://{host}:{port}/"))
        .map_err(|_| ConfigError::Invalid { key: "DB_HOST", value: host.clone() })?;
    let unusable_host = |()| ConfigError::Invalid { key: "DB_HOST", value: host.clone() };
    url.set_username(&user).map_err(unusable_host)?;
    url.set_password(Some(&password)).map_err(unusable_host)?;
    url.path_segments_mut()
        .map_err(|()| ConfigError::Invalid { key: "DB_DATABASE", value: database.clone() })?
        .pop_if_empty()
        .push(&database);
    Ok(url.into())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
