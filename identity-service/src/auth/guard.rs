//! Policy applied to every change of memberships and API key rights.

use crate::models::{EntityId, EntityKind, Right, Rights};
use crate::services::ServiceError;
use crate::services::store::StoreTx;

/// Difference between the old and the new rights, both implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RightsDelta {
    pub added: Rights,
    pub removed: Rights,
}

impl RightsDelta {
    pub fn between(old: &Rights, new: &Rights) -> Self {
        let old = old.implied();
        let new = new.implied();
        Self {
            added: new.sub(&old),
            removed: old.sub(&new),
        }
    }
}

/// Checks that the caller holds every right it adds and, unless the change
/// deletes the grant, every right it removes.
pub fn check_delta(caller: &Rights, old: &Rights, new: &Rights) -> Result<RightsDelta, ServiceError> {
    let delta = RightsDelta::between(old, new);

    let missing = caller.missing(&delta.added);
    if !missing.is_empty() {
        tracing::debug!(missing = %missing, "Refusing to grant rights the caller does not hold");
        return Err(ServiceError::InsufficientRights { missing });
    }

    if !new.is_empty() {
        let missing = caller.missing(&delta.removed);
        if !missing.is_empty() {
            tracing::debug!(missing = %missing, "Refusing to revoke rights the caller does not hold");
            return Err(ServiceError::InsufficientRights { missing });
        }
    }
    Ok(delta)
}

/// Rejects a change that would leave `entity` without a member holding its
/// `ALL` right. `subject` is the account being changed.
pub async fn ensure_collaborator_remains(
    tx: &mut dyn StoreTx,
    entity: &EntityId,
    subject: &EntityId,
    removed: &Rights,
) -> Result<(), ServiceError> {
    let kind = entity.kind();
    let Some(all) = Right::all_of(kind) else {
        return Ok(());
    };
    if !removed.contains(all) {
        return Ok(());
    }

    let members = tx.find_members(entity).await?;
    let remains = members
        .iter()
        .any(|(account, rights)| account != subject && rights.implied().contains(all));
    if !remains {
        tracing::info!(entity = %entity, subject = %subject, "Refusing to remove the last owner");
        return Err(ServiceError::NeedsCollaborator { kind });
    }
    Ok(())
}

/// Rejects a change to the organization API key `key_id` that would leave
/// the organization with neither a member nor another key holding its `ALL`
/// right. A user keeps its own sessions, so user keys are never checked.
pub async fn ensure_key_avenue_remains(
    tx: &mut dyn StoreTx,
    entity: &EntityId,
    key_id: &str,
    removed: &Rights,
) -> Result<(), ServiceError> {
    if entity.kind() != EntityKind::Organization || !removed.contains(Right::OrganizationAll) {
        return Ok(());
    }

    let member = tx
        .find_members(entity)
        .await?
        .iter()
        .any(|(_, rights)| rights.implied().contains(Right::OrganizationAll));
    if member {
        return Ok(());
    }
    let key = tx
        .find_api_keys(entity)
        .await?
        .iter()
        .any(|key| key.id != key_id && key.rights.implied().contains(Right::OrganizationAll));
    if !key {
        tracing::info!(entity = %entity, key_id, "Refusing to remove the last owning API key");
        return Err(ServiceError::NeedsCollaborator {
            kind: EntityKind::Organization,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, State, User};
    use crate::services::store::{MemoryStore, Store};

    fn caller() -> Rights {
        Rights::from([Right::ApplicationInfo, Right::ApplicationLink])
    }

    #[test]
    fn test_cannot_add_rights_not_held() {
        let err = check_delta(
            &caller(),
            &Rights::new(),
            &Rights::from([Right::ApplicationInfo, Right::ApplicationLink, Right::ApplicationDelete]),
        )
        .unwrap_err();
        assert_eq!(err.name(), "insufficient_rights");
    }

    #[test]
    fn test_cannot_remove_rights_not_held_unless_deleting() {
        let old = Rights::from([Right::ApplicationInfo, Right::ApplicationDelete]);
        let err = check_delta(&caller(), &old, &Rights::from([Right::ApplicationInfo])).unwrap_err();
        assert_eq!(err.name(), "insufficient_rights");

        let delta = check_delta(&caller(), &old, &Rights::new()).unwrap();
        assert_eq!(delta.removed, old);
        assert!(delta.added.is_empty());
    }

    #[test]
    fn test_narrowing_within_caller_scope() {
        let delta = check_delta(
            &caller(),
            &caller(),
            &Rights::from([Right::ApplicationInfo]),
        )
        .unwrap();
        assert_eq!(delta.removed, Rights::from([Right::ApplicationLink]));
    }

    #[test]
    fn test_delta_compares_implied_rights() {
        let delta = RightsDelta::between(
            &Rights::from([Right::GatewayAll]),
            &Rights::family(crate::models::EntityKind::Gateway),
        );
        assert!(delta.added.is_empty());
        assert!(delta.removed.is_empty());
    }

    #[tokio::test]
    async fn test_last_owner_is_kept() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for id in ["u1", "u2"] {
            tx.create_user(&User::new(
                id.into(),
                id.into(),
                format!("{}@example.com", id),
                "hash".into(),
                State::Approved,
            ))
            .await
            .unwrap();
        }
        let gateway = EntityId::gateway("g");
        tx.create_entity(&Entity::new(gateway.clone(), "G".into(), String::new()).unwrap())
            .await
            .unwrap();
        let owner = Rights::from([Right::GatewayAll]).implied();
        tx.set_member(&EntityId::user("u1"), &gateway, &owner).await.unwrap();

        let err = ensure_collaborator_remains(tx.as_mut(), &gateway, &EntityId::user("u1"), &owner)
            .await
            .unwrap_err();
        assert_eq!(err.name(), "gateway_needs_collaborator");

        tx.set_member(&EntityId::user("u2"), &gateway, &owner).await.unwrap();
        ensure_collaborator_remains(tx.as_mut(), &gateway, &EntityId::user("u1"), &owner)
            .await
            .unwrap();

        ensure_collaborator_remains(
            tx.as_mut(),
            &gateway,
            &EntityId::user("u2"),
            &Rights::from([Right::GatewayInfo]),
        )
        .await
        .unwrap();
    }
}
