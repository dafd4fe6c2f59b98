//! Effective rights of a caller on a target entity.

use crate::auth::auth_info::AuthInfo;
use crate::auth::cache::MembershipRightsCache;
use crate::models::{EntityDetails, EntityId, EntityKind, Right, Rights};
use crate::services::ServiceError;
use crate::services::store::StoreTx;

/// Computes the rights `info` holds on `target`.
///
/// The result is always a subset of `info.rights ∪ info.universal_rights`.
/// Membership rights are read from `cache` when one is given; callers that
/// must not act on stale data (mutations) pass `None`. For admins a missing
/// target is `not_found`; everyone else gets empty rights.
pub async fn resolve_rights(
    tx: &mut dyn StoreTx,
    cache: Option<&MembershipRightsCache>,
    info: &AuthInfo,
    target: &EntityId,
) -> Result<Rights, ServiceError> {
    let holder = target.rights_holder();
    let kind = holder.kind();

    if info.principal.as_ref() == Some(&holder) {
        return Ok(info.rights.union(&info.universal_rights));
    }

    let applicable = Rights::assignable_for(kind);
    let potential = info.rights.intersect(&applicable);
    let universal = info.universal_rights.intersect(&applicable);
    if potential.is_empty() && universal.is_empty() {
        return Ok(Rights::new());
    }

    if info.is_admin && !tx.entity_exists(&holder).await? {
        return Err(ServiceError::not_found(kind.as_str(), holder.id()));
    }

    let principal = match &info.principal {
        Some(principal) if principal.is_account() && kind != EntityKind::User => principal,
        _ => return Ok(universal),
    };

    let mut rights = universal.clone();
    if !potential.is_empty() {
        let entity_rights = match cache {
            Some(cache) => match cache.get(principal, &holder).await {
                Some(rights) => rights,
                None => {
                    let rights = membership_rights(tx, principal, &holder).await?;
                    cache.put(principal, &holder, &rights).await;
                    rights
                }
            },
            None => membership_rights(tx, principal, &holder).await?,
        };
        rights = rights.union(&entity_rights.intersect(&potential));
    }

    if kind == EntityKind::Gateway {
        let public = public_gateway_rights(tx, &holder).await?;
        rights = rights.union(&public.intersect(&potential.union(&universal)));
    }
    Ok(rights)
}

/// Union over every membership chain of the intersection along the chain.
async fn membership_rights(
    tx: &mut dyn StoreTx,
    account: &EntityId,
    entity: &EntityId,
) -> Result<Rights, ServiceError> {
    let chains = tx
        .find_account_membership_chains(account, entity.kind(), &[entity.id().to_string()])
        .await?;
    Ok(chains
        .iter()
        .fold(Rights::new(), |acc, chain| acc.union(&chain.effective_rights())))
}

async fn public_gateway_rights(
    tx: &mut dyn StoreTx,
    gateway: &EntityId,
) -> Result<Rights, ServiceError> {
    let mut rights = Rights::new();
    if let Some(entity) = tx.get_entity(gateway, false).await? {
        if let EntityDetails::Gateway {
            status_public,
            location_public,
            ..
        } = entity.details
        {
            if status_public {
                rights.insert(Right::GatewayStatusRead);
            }
            if location_public {
                rights.insert(Right::GatewayLocationRead);
            }
        }
    }
    Ok(rights)
}

/// Fails with `insufficient_rights` unless `held` includes every right of `required`.
pub fn require(held: &Rights, required: &Rights) -> Result<(), ServiceError> {
    let missing = held.missing(required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::InsufficientRights { missing })
    }
}
