//! Request-scoped transaction wrapper.
//!
//! DESIGN
//! ======
//! A handler that must write several rows atomically passes a closure to
//! [`transactional`]. The closure receives the transaction's connection and
//! returns a boxed future; `Ok` commits, `Err` rolls back, and the closure's
//! result comes back unchanged. The closure must own everything it captures
//! because the future borrows only the connection.

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool};

/// Run `work` inside a single database transaction.
///
/// # Errors
///
/// Returns the closure's error (after rolling back), or a database error if
/// the transaction cannot be opened or committed.
pub async fn transactional<T, E, F>(pool: &PgPool, work: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>>,
    E: From<sqlx::Error>,
{
    let mut tx = pool.begin().await?;

    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
#[path = "transaction_test.rs"]
mod tests;
