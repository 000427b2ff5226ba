//! Postgres pool and embedded schema migrations.
//!
//! `main` builds the pool once and hands it to `AppState`; every service
//! borrows it from there. Migrations under `src/db/migrations` are compiled
//! into the binary and applied when `DB_SYNCHRONIZE` is on.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// How long a request waits for a free connection before failing.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect the pool and, if asked, bring the schema up to date.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn init_pool(database_url: &str, max_connections: u32, run_migrations: bool) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "database pool ready");

    if run_migrations {
        sqlx::migrate!("src/db/migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
    }

    Ok(pool)
}
