//! Stock validator: the negative-stock override policy (spec.md §4.7).
//!
//! Called from inside the shipment poster's transaction, after reservation
//! consumption has been netted out of the lines it validates — this module
//! never knows about reservations, only the final `quantityToConsume` per
//! balance row.

use crate::balance::{self, BalanceKey};
use crate::core_types::{ItemId, LocationId, TenantId};
use crate::error::EngineError;
use crate::money::{EPSILON_RAW, ScaledQty};
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone)]
pub struct ConsumptionLine {
    pub item: ItemId,
    pub location: LocationId,
    pub canonical_uom: String,
    pub quantity_to_consume: ScaledQty,
}

/// Caller-supplied override intent. `requested=false` means "fail hard on
/// any shortfall", matching the default posting path.
#[derive(Debug, Clone, Default)]
pub struct OverrideRequest {
    pub requested: bool,
    pub reason: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OverrideMetadata {
    pub override_reason: String,
    pub override_reference: Option<String>,
    pub actor: String,
}

/// Authorization boundary this crate does not own — whether `actor` may
/// post a negative-stock override is a policy decision for the excluded
/// auth/RBAC peer. Same shape as [`crate::uom::UomCatalog`].
pub trait OverrideAuthority: Send + Sync {
    fn can_override_negative_stock(&self, tenant: TenantId, actor: &str) -> bool;
}

/// Test/dev authority that grants override capability to everyone.
pub struct AllowAllAuthority;

impl OverrideAuthority for AllowAllAuthority {
    fn can_override_negative_stock(&self, _tenant: TenantId, _actor: &str) -> bool {
        true
    }
}

/// Test/dev authority that denies override capability to everyone —
/// exercises the `NEGATIVE_OVERRIDE_NOT_ALLOWED` path.
pub struct DenyAllAuthority;

impl OverrideAuthority for DenyAllAuthority {
    fn can_override_negative_stock(&self, _tenant: TenantId, _actor: &str) -> bool {
        false
    }
}

/// Ensures every line's balance row exists, reads canonical availability
/// under lock, and either returns `Ok(None)` (everything fits), `Ok(Some(..))`
/// (an authorized, reasoned override is in play), or fails.
pub async fn validate(
    tx: &mut Transaction<'_, Postgres>,
    tenant: TenantId,
    lines: &[ConsumptionLine],
    actor: &str,
    override_request: &OverrideRequest,
    authority: &dyn OverrideAuthority,
) -> Result<Option<OverrideMetadata>, EngineError> {
    let mut all_satisfied = true;

    for line in lines {
        let key = BalanceKey::new(tenant, line.item, line.location, line.canonical_uom.clone());
        balance::ensure_row(tx, &key).await?;
        let bal = balance::lock_and_read(tx, &key).await?;
        let available = bal.available();
        if available.raw() + EPSILON_RAW < line.quantity_to_consume.raw() {
            all_satisfied = false;
        }
    }

    if all_satisfied {
        return Ok(None);
    }

    if !override_request.requested {
        return Err(EngineError::InsufficientStock);
    }

    if !authority.can_override_negative_stock(tenant, actor) {
        return Err(EngineError::NegativeOverrideNotAllowed);
    }

    let reason = override_request
        .reason
        .clone()
        .ok_or(EngineError::NegativeOverrideRequiresReason)?;

    Ok(Some(OverrideMetadata {
        override_reason: reason,
        override_reference: override_request.reference.clone(),
        actor: actor.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_authority_always_grants() {
        assert!(AllowAllAuthority.can_override_negative_stock(TenantId::from(1), "anyone"));
    }

    #[test]
    fn deny_all_authority_never_grants() {
        assert!(!DenyAllAuthority.can_override_negative_stock(TenantId::from(1), "anyone"));
    }
}
