//! The `InventoryBalance` store: per (tenant, item, location, uom) row with
//! `on_hand`/`reserved`/`allocated` counters, mutated only via
//! locked-read-then-update so concurrent writers serialize on the row
//! rather than racing a compare-and-swap loop.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use crate::core_types::{ItemId, LocationId, TenantId};
use crate::error::EngineError;
use crate::money::{EPSILON_RAW, ScaledQty, ScaledQtySigned};

/// Key identifying a balance row. `uom` is always the item's canonical uom
/// — balances never exist in an entered uom.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    pub tenant: TenantId,
    pub item: ItemId,
    pub location: LocationId,
    pub uom: String,
}

impl BalanceKey {
    pub fn new(tenant: TenantId, item: ItemId, location: LocationId, uom: impl Into<String>) -> Self {
        Self {
            tenant,
            item,
            location,
            uom: uom.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryBalance {
    pub on_hand: ScaledQty,
    pub reserved: ScaledQty,
    pub allocated: ScaledQty,
    pub updated_at: DateTime<Utc>,
}

impl InventoryBalance {
    /// `available = onHand - reserved - allocated`.
    pub fn available(&self) -> ScaledQtySigned {
        ScaledQtySigned::from(self.on_hand)
            .checked_add(ScaledQtySigned::from(self.reserved).negate())
            .and_then(|v| v.checked_add(ScaledQtySigned::from(self.allocated).negate()))
            .unwrap_or(ScaledQtySigned::ZERO)
    }
}

fn row_to_balance(row: &sqlx::postgres::PgRow) -> InventoryBalance {
    InventoryBalance {
        on_hand: ScaledQty::from_raw(row.get::<i64, _>("on_hand")),
        reserved: ScaledQty::from_raw(row.get::<i64, _>("reserved")),
        allocated: ScaledQty::from_raw(row.get::<i64, _>("allocated")),
        updated_at: row.get("updated_at"),
    }
}

/// Idempotent insert of a zero-counter row for `key`, `ON CONFLICT DO
/// NOTHING` — safe to call on every touch of a balance, including the
/// first.
pub async fn ensure_row(tx: &mut Transaction<'_, Postgres>, key: &BalanceKey) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO inventory_balance (tenant_id, item_id, location_id, uom, on_hand, reserved, allocated, updated_at)
        VALUES ($1, $2, $3, $4, 0, 0, 0, NOW())
        ON CONFLICT (tenant_id, item_id, location_id, uom) DO NOTHING
        "#,
    )
    .bind(key.tenant.get())
    .bind(key.item.get())
    .bind(key.location.get())
    .bind(&key.uom)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Row-level lock then read. Fails `BALANCE_ROW_MISSING` if the row is
/// absent even after [`ensure_row`] should have created it — an invariant
/// violation, not a normal-path outcome.
pub async fn lock_and_read(
    tx: &mut Transaction<'_, Postgres>,
    key: &BalanceKey,
) -> Result<InventoryBalance, EngineError> {
    let row = sqlx::query(
        r#"
        SELECT on_hand, reserved, allocated, updated_at
        FROM inventory_balance
        WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3 AND uom = $4
        FOR UPDATE
        "#,
    )
    .bind(key.tenant.get())
    .bind(key.item.get())
    .bind(key.location.get())
    .bind(&key.uom)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|r| row_to_balance(&r)).ok_or(EngineError::BalanceRowMissing)
}

/// Reads with lock, computes next counters, rejects if `reserved` or
/// `allocated` would go below `-ε`, clamps the in-between range to zero on
/// write, and skips the write entirely when every delta is within ε of
/// zero. Stamps `updated_at`. Returns the balance as committed (or as read,
/// when skipped).
pub async fn apply_delta(
    tx: &mut Transaction<'_, Postgres>,
    key: &BalanceKey,
    delta_on_hand: ScaledQtySigned,
    delta_reserved: ScaledQtySigned,
    delta_allocated: ScaledQtySigned,
) -> Result<InventoryBalance, EngineError> {
    let current = lock_and_read(tx, key).await?;

    if delta_on_hand.raw().abs() <= EPSILON_RAW
        && delta_reserved.raw().abs() <= EPSILON_RAW
        && delta_allocated.raw().abs() <= EPSILON_RAW
    {
        return Ok(current);
    }

    let next_on_hand_raw = current.on_hand.raw() + delta_on_hand.raw();
    let next_reserved_raw = current.reserved.raw() + delta_reserved.raw();
    let next_allocated_raw = current.allocated.raw() + delta_allocated.raw();

    if next_reserved_raw < -EPSILON_RAW || next_allocated_raw < -EPSILON_RAW {
        return Err(EngineError::Internal(format!(
            "applyDelta would drive reserved/allocated negative for {:?}: reserved {} allocated {}",
            key, next_reserved_raw, next_allocated_raw
        )));
    }

    let on_hand = ScaledQty::from_raw(next_on_hand_raw.max(0));
    let reserved = ScaledQty::from_raw(next_reserved_raw.max(0));
    let allocated = ScaledQty::from_raw(next_allocated_raw.max(0));

    sqlx::query(
        r#"
        UPDATE inventory_balance
        SET on_hand = $1, reserved = $2, allocated = $3, updated_at = NOW()
        WHERE tenant_id = $4 AND item_id = $5 AND location_id = $6 AND uom = $7
        "#,
    )
    .bind(on_hand.raw())
    .bind(reserved.raw())
    .bind(allocated.raw())
    .bind(key.tenant.get())
    .bind(key.item.get())
    .bind(key.location.get())
    .bind(&key.uom)
    .execute(&mut **tx)
    .await?;

    Ok(InventoryBalance {
        on_hand,
        reserved,
        allocated,
        updated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(on_hand: i64, reserved: i64, allocated: i64) -> InventoryBalance {
        InventoryBalance {
            on_hand: ScaledQty::from_raw(on_hand),
            reserved: ScaledQty::from_raw(reserved),
            allocated: ScaledQty::from_raw(allocated),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn available_is_on_hand_minus_reserved_minus_allocated() {
        let b = balance(100, 25, 10);
        assert_eq!(b.available().raw(), 65);
    }

    #[test]
    fn available_can_be_negative_under_the_shipment_allowance() {
        let b = balance(0, 5, 0);
        assert_eq!(b.available().raw(), -5);
    }
}
