//! `audit_log` append writes.
//!
//! Not part of spec.md's entity list, but required by §4.6 step 12 ("`post`
//! on shipment; if override applied, a `negative_override` audit row") and
//! exercised by scenario S7. Written in the same transaction as the state
//! change it records, the same discipline as [`crate::outbox::enqueue_event`].

use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::core_types::TenantId;
use crate::error::EngineError;

pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    actor: &str,
    metadata: Value,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log
            (id, tenant_id, action, entity_type, entity_id, actor, metadata, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(tenant.get())
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(actor)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
