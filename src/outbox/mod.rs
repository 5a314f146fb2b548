//! Transactional outbox: every state change that needs to notify the rest
//! of the system writes an `outbox_events` row in the same transaction as
//! the change itself, so a publisher failure can never desync from the
//! committed state it describes.

use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};

use crate::core_types::TenantId;
use crate::error::EngineError;

/// Insert-only write into the caller's open transaction. Never commits or
/// publishes on its own — delivery is the job of [`OutboxPublisher`],
/// which runs independently of the transaction that produced the event.
pub async fn enqueue_event(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    aggregate_type: &str,
    aggregate_id: &str,
    event_type: &str,
    payload: Value,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_events
            (id, tenant_id, aggregate_type, aggregate_id, event_type, payload, dispatched, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, false, NOW())
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(tenant.get())
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(event_type)
    .bind(payload)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: uuid::Uuid,
    pub tenant: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
}

/// Downstream delivery boundary: publishing to a message bus, webhook
/// relay, or change-data stream is out of scope here, so implementers
/// plug in their own transport behind this trait.
#[async_trait::async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), EngineError>;
}

/// Polls undispatched rows oldest-first, publishes each through `publisher`,
/// and marks it dispatched on success. Stops at the first publish failure
/// so delivery order is preserved and the row is retried on the next poll.
pub async fn drain_once(
    pool: &sqlx::PgPool,
    publisher: &dyn OutboxPublisher,
    batch_size: i64,
) -> Result<usize, EngineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, tenant_id, aggregate_type, aggregate_id, event_type, payload
        FROM outbox_events
        WHERE NOT dispatched
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut dispatched = 0usize;
    for row in rows {
        let event = OutboxEvent {
            id: row.get("id"),
            tenant: TenantId::from(row.get::<i64, _>("tenant_id")),
            aggregate_type: row.get("aggregate_type"),
            aggregate_id: row.get("aggregate_id"),
            event_type: row.get("event_type"),
            payload: row.get("payload"),
        };

        match publisher.publish(&event).await {
            Ok(()) => {
                sqlx::query("UPDATE outbox_events SET dispatched = true, dispatched_at = NOW() WHERE id = $1")
                    .bind(event.id)
                    .execute(pool)
                    .await?;
                dispatched += 1;
            }
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "outbox publish failed, stopping batch");
                break;
            }
        }
    }

    Ok(dispatched)
}

/// No-op publisher for tests and deployments that consume the outbox
/// table directly (e.g. via logical replication) rather than through this
/// in-process drainer.
pub struct NullPublisher;

#[async_trait::async_trait]
impl OutboxPublisher for NullPublisher {
    async fn publish(&self, _event: &OutboxEvent) -> Result<(), EngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_publisher_always_succeeds() {
        let publisher = NullPublisher;
        let event = OutboxEvent {
            id: uuid::Uuid::new_v4(),
            tenant: TenantId::from(1),
            aggregate_type: "reservation".into(),
            aggregate_id: "r-1".into(),
            event_type: "inventory.reservation.changed".into(),
            payload: serde_json::json!({}),
        };
        assert!(publisher.publish(&event).await.is_ok());
    }
}
