//! Connection pool and the SERIALIZABLE-transaction-with-retry helper.
//!
//! Every mutating engine operation goes through [`with_serializable_retry`]
//! rather than opening its own transaction — this is the single place the
//! "begin SERIALIZABLE, run the op, retry on 40001, surface
//! `ATP_CONCURRENCY_EXHAUSTED` on exhaustion" protocol is implemented, so no
//! individual operation can drift from it.

use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::error::EngineError;

/// PostgreSQL connection pool wrapper.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Runs `op` inside a `BEGIN ISOLATION LEVEL SERIALIZABLE` transaction.
///
/// On [`EngineError::SerializationConflict`] (Postgres SQLSTATE 40001) the
/// transaction is rolled back and `op` re-run from scratch, up to
/// `max_retries` times; any other error rolls back and propagates
/// immediately. On retry exhaustion, returns
/// `EngineError::ConcurrencyExhausted`.
pub async fn with_serializable_retry<T, F>(
    pool: &PgPool,
    max_retries: u32,
    mut op: F,
) -> Result<T, EngineError>
where
    T: Send,
    F: for<'c> FnMut(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T, EngineError>>,
{
    let mut attempt = 0u32;
    loop {
        let mut tx = pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        match op(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                return Ok(value);
            }
            Err(EngineError::SerializationConflict) => {
                let _ = tx.rollback().await;
                attempt += 1;
                if attempt > max_retries {
                    return Err(EngineError::ConcurrencyExhausted { attempts: attempt });
                }
                tracing::debug!(attempt, "serialization conflict, retrying transaction");
                continue;
            }
            Err(other) => {
                let _ = tx.rollback().await;
                return Err(other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn create_test_pool() -> Option<PgPool> {
        let database_url = std::env::var("DATABASE_URL").ok()?;
        PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await
            .ok()
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL running
    async fn health_check_succeeds_against_live_db() {
        let pool = match create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test - database not available");
                return;
            }
        };
        let db = Database { pool };
        assert!(db.health_check().await.is_ok());
    }

    #[tokio::test]
    #[ignore]
    async fn with_serializable_retry_commits_on_success() {
        let pool = match create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test - database not available");
                return;
            }
        };

        let result: Result<i32, EngineError> =
            with_serializable_retry(&pool, 2, |_tx| Box::pin(async move { Ok(42) })).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    #[ignore]
    async fn with_serializable_retry_exhausts_on_repeated_conflict() {
        let pool = match create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test - database not available");
                return;
            }
        };

        let result: Result<(), EngineError> = with_serializable_retry(&pool, 2, |_tx| {
            Box::pin(async move { Err(EngineError::SerializationConflict) })
        })
        .await;
        assert!(matches!(
            result,
            Err(EngineError::ConcurrencyExhausted { attempts: 3 })
        ));
    }
}
