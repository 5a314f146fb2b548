//! Request-keyed idempotency records. Every externally retriable operation
//! (`createReservations`, a state transition, shipment posting) begins by
//! calling [`begin_idempotency`] inside the same transaction as its other
//! work, so the record's fate is tied to whether that work actually
//! committed.

use sqlx::{Postgres, Row, Transaction};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl IdempotencyStatus {
    fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::InProgress => "IN_PROGRESS",
            IdempotencyStatus::Succeeded => "SUCCEEDED",
            IdempotencyStatus::Failed => "FAILED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "SUCCEEDED" => IdempotencyStatus::Succeeded,
            "FAILED" => IdempotencyStatus::Failed,
            _ => IdempotencyStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub body_hash: String,
    pub status: IdempotencyStatus,
    pub entity_ref: Option<String>,
}

/// Outcome of [`begin_idempotency`]: either the caller should proceed with
/// fresh work, or a previous attempt already decided the outcome.
pub enum BeginOutcome {
    Proceed,
    ShortCircuitSucceeded { entity_ref: Option<String> },
}

/// Inserts an `IN_PROGRESS` record for `key`, or inspects the existing one:
///
/// - no existing record → insert `IN_PROGRESS`, return [`BeginOutcome::Proceed`].
/// - existing `IN_PROGRESS` → fails `IDEMPOTENCY_IN_PROGRESS` (a concurrent
///   call with the same key is still running).
/// - existing `SUCCEEDED` with the same `bodyHash` → short-circuits with the
///   recorded `entityRef`, doing no new work.
/// - existing `SUCCEEDED` with a different `bodyHash` → fails
///   `IDEMPOTENCY_CONFLICT` (same key reused for a different request body).
/// - existing `FAILED` → treated like no record: re-inserted as `IN_PROGRESS`
///   and retried.
pub async fn begin_idempotency(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
    body_hash: &str,
) -> Result<BeginOutcome, EngineError> {
    let existing = sqlx::query(
        "SELECT key, body_hash, status, entity_ref FROM idempotency_records WHERE key = $1 FOR UPDATE",
    )
    .bind(key)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            sqlx::query(
                r#"
                INSERT INTO idempotency_records (key, body_hash, status, entity_ref, created_at, updated_at)
                VALUES ($1, $2, 'IN_PROGRESS', NULL, NOW(), NOW())
                "#,
            )
            .bind(key)
            .bind(body_hash)
            .execute(&mut **tx)
            .await?;
            Ok(BeginOutcome::Proceed)
        }
        Some(row) => {
            let status = IdempotencyStatus::from_str(row.get::<String, _>("status").as_str());
            let existing_hash: String = row.get("body_hash");

            match status {
                IdempotencyStatus::InProgress => Err(EngineError::IdempotencyInProgress {
                    op: key.to_string(),
                }),
                IdempotencyStatus::Succeeded if existing_hash == body_hash => {
                    Ok(BeginOutcome::ShortCircuitSucceeded {
                        entity_ref: row.get("entity_ref"),
                    })
                }
                IdempotencyStatus::Succeeded => Err(EngineError::IdempotencyConflict),
                IdempotencyStatus::Failed => {
                    sqlx::query(
                        r#"
                        UPDATE idempotency_records
                        SET body_hash = $2, status = 'IN_PROGRESS', entity_ref = NULL, updated_at = NOW()
                        WHERE key = $1
                        "#,
                    )
                    .bind(key)
                    .bind(body_hash)
                    .execute(&mut **tx)
                    .await?;
                    Ok(BeginOutcome::Proceed)
                }
            }
        }
    }
}

/// Finalizes a record begun by [`begin_idempotency`]. Called at the end of
/// the same transaction, right before commit — a transaction that rolls
/// back for any other reason never reaches `SUCCEEDED`, so a retry
/// re-executes the work.
pub async fn complete_idempotency(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
    status: IdempotencyStatus,
    entity_ref: Option<&str>,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET status = $2, entity_ref = $3, updated_at = NOW()
        WHERE key = $1
        "#,
    )
    .bind(key)
    .bind(status.as_str())
    .bind(entity_ref)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            IdempotencyStatus::InProgress,
            IdempotencyStatus::Succeeded,
            IdempotencyStatus::Failed,
        ] {
            assert_eq!(IdempotencyStatus::from_str(s.as_str()), s);
        }
    }
}
