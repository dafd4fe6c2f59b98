//! Rights, API keys and collaborators of users and registry entities.

use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::auth::{
    check_delta, ensure_collaborator_remains, ensure_key_avenue_remains, require, Authorizer,
    BearerToken, RequestContext, TokenKind,
};
use crate::dtos::access::{
    Collaborator, CreateApiKeyRequest, CreateApiKeyResponse, UpdateApiKeyRequest,
};
use crate::models::{ApiKey, EntityId, EntityKind, Page, Pagination, Right, Rights};
use crate::services::store::{Store, StoreTx};
use crate::services::ServiceError;
use crate::utils::{generate_id, generate_secret, hash_secret};

#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn Store>,
    authz: Authorizer,
}

impl AccessService {
    pub fn new(store: Arc<dyn Store>, authz: Authorizer) -> Self {
        Self { store, authz }
    }

    /// Effective rights of the caller on `entity`.
    pub async fn list_rights(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
    ) -> Result<Rights, ServiceError> {
        self.authz.rights_on(ctx, entity).await
    }

    // ==================== API keys ====================

    pub async fn create_api_key(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        req: CreateApiKeyRequest,
    ) -> Result<CreateApiKeyResponse, ServiceError> {
        req.validate()?;
        let kind = entity.kind();
        let held = self
            .authz
            .require(ctx, entity, &[api_keys_right(kind)?])
            .await?;

        check_assignable(&req.rights, kind)?;
        require(&held, &req.rights.implied())?;
        let now = Utc::now();
        if req.expires_at.is_some_and(|at| at <= now) {
            return Err(ServiceError::invalid_argument(
                "expires_at",
                "must be in the future",
            ));
        }

        let mut tx = self.store.begin().await?;
        ensure_exists(tx.as_mut(), entity).await?;

        let secret = generate_secret();
        let key = ApiKey::new(
            generate_id(),
            hash_secret(&secret),
            entity.clone(),
            req.name,
            req.rights,
            req.expires_at,
        );
        tx.create_api_key(&key).await?;
        tx.commit().await?;

        tracing::info!(entity = %entity, key_id = %key.id, "API key created");
        let token = BearerToken::new(TokenKind::ApiKey, key.id.clone(), secret).to_string();
        Ok(CreateApiKeyResponse { api_key: key, key: token })
    }

    pub async fn list_api_keys(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        pagination: &Pagination,
    ) -> Result<Page<ApiKey>, ServiceError> {
        self.authz
            .require(ctx, entity, &[api_keys_right(entity.kind())?])
            .await?;

        let mut tx = self.store.begin().await?;
        let mut keys = tx.find_api_keys(entity).await?;
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if pagination.descending() {
            keys.reverse();
        }
        let total = keys.len() as u64;
        Ok(Page {
            items: pagination.apply(keys),
            total,
        })
    }

    pub async fn get_api_key(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        key_id: &str,
    ) -> Result<ApiKey, ServiceError> {
        self.authz
            .require(ctx, entity, &[api_keys_right(entity.kind())?])
            .await?;

        let mut tx = self.store.begin().await?;
        owned_key(tx.as_mut(), entity, key_id).await
    }

    /// Renames the key or changes its rights or expiry. Empty rights delete
    /// the key, in which case `None` is returned.
    pub async fn update_api_key(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        key_id: &str,
        req: UpdateApiKeyRequest,
    ) -> Result<Option<ApiKey>, ServiceError> {
        req.validate()?;
        let kind = entity.kind();
        let info = self.authz.authenticated(ctx).await?;
        self.authz.require(ctx, entity, &[api_keys_right(kind)?]).await?;
        if let Some(rights) = &req.rights {
            check_assignable(rights, kind)?;
        }
        let now = Utc::now();
        if req.expires_at.is_some_and(|at| at <= now) {
            return Err(ServiceError::invalid_argument(
                "expires_at",
                "must be in the future",
            ));
        }

        let mut tx = self.store.begin().await?;
        tx.lock_entity(entity).await?;
        let mut key = owned_key(tx.as_mut(), entity, key_id).await?;

        if let Some(rights) = req.rights {
            let caller = self.authz.rights_in_tx(tx.as_mut(), &info, entity).await?;
            let delta = check_delta(&caller, &key.rights, &rights)?;
            ensure_key_avenue_remains(tx.as_mut(), entity, &key.id, &delta.removed).await?;
            if rights.is_empty() {
                tx.delete_api_key(&key.id).await?;
                tx.commit().await?;
                tracing::info!(entity = %entity, key_id = %key_id, "API key deleted by update");
                return Ok(None);
            }
            key.rights = rights;
        }
        if let Some(name) = req.name {
            key.name = name;
        }
        if req.expires_at.is_some() {
            key.expires_at = req.expires_at;
        }
        key.updated_at = now;
        tx.update_api_key(&key).await?;
        tx.commit().await?;

        tracing::info!(entity = %entity, key_id = %key_id, "API key updated");
        Ok(Some(key))
    }

    /// The caller must hold every right of the key.
    pub async fn delete_api_key(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        key_id: &str,
    ) -> Result<(), ServiceError> {
        let info = self.authz.authenticated(ctx).await?;
        self.authz
            .require(ctx, entity, &[api_keys_right(entity.kind())?])
            .await?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(entity).await?;
        let key = owned_key(tx.as_mut(), entity, key_id).await?;
        let caller = self.authz.rights_in_tx(tx.as_mut(), &info, entity).await?;
        require(&caller, &key.rights.implied())?;
        ensure_key_avenue_remains(tx.as_mut(), entity, &key.id, &key.rights.implied()).await?;
        tx.delete_api_key(&key.id).await?;
        tx.commit().await?;

        tracing::info!(entity = %entity, key_id = %key_id, "API key deleted");
        Ok(())
    }

    // ==================== Collaborators ====================

    pub async fn get_collaborator(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        account: &EntityId,
    ) -> Result<Collaborator, ServiceError> {
        collaborators_right(entity.kind())?;
        self.authz
            .require(ctx, entity, &[Right::info(entity.kind())])
            .await?;

        let mut tx = self.store.begin().await?;
        let rights = tx
            .get_member(account, entity)
            .await?
            .ok_or_else(|| ServiceError::not_found("collaborator", account.to_string()))?;
        Ok(Collaborator {
            ids: account.clone(),
            rights,
        })
    }

    pub async fn list_collaborators(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        pagination: &Pagination,
    ) -> Result<Page<Collaborator>, ServiceError> {
        collaborators_right(entity.kind())?;
        self.authz
            .require(ctx, entity, &[Right::info(entity.kind())])
            .await?;

        let mut tx = self.store.begin().await?;
        let mut members = tx.find_members(entity).await?;
        members.sort_by(|a, b| a.0.cmp(&b.0));
        if pagination.descending() {
            members.reverse();
        }
        let total = members.len() as u64;
        let items = pagination
            .apply(members)
            .into_iter()
            .map(|(ids, rights)| Collaborator { ids, rights })
            .collect();
        Ok(Page { items, total })
    }

    /// Grants `rights` to `account`. Empty rights remove the collaborator.
    pub async fn set_collaborator(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        account: &EntityId,
        rights: Rights,
    ) -> Result<(), ServiceError> {
        self.change_collaborator(ctx, entity, account, rights, false).await
    }

    pub async fn delete_collaborator(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        account: &EntityId,
    ) -> Result<(), ServiceError> {
        self.change_collaborator(ctx, entity, account, Rights::new(), true)
            .await
    }

    async fn change_collaborator(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
        account: &EntityId,
        rights: Rights,
        must_exist: bool,
    ) -> Result<(), ServiceError> {
        let kind = entity.kind();
        let settings = collaborators_right(kind)?;
        if !account.kind().can_be_member_of(kind) {
            return Err(ServiceError::InvalidMembership {
                account: account.kind(),
                entity: kind,
            });
        }
        check_assignable(&rights, kind)?;

        let info = self.authz.authenticated(ctx).await?;
        self.authz.require(ctx, entity, &[settings]).await?;
        let on_account = match account {
            EntityId::Organization(_) if !rights.is_empty() => {
                Some(self.authz.rights_on(ctx, account).await?)
            }
            _ => None,
        };

        let mut tx = self.store.begin().await?;
        tx.lock_entity(entity).await?;
        ensure_exists(tx.as_mut(), entity).await?;
        ensure_exists(tx.as_mut(), account).await?;

        let old = tx.get_member(account, entity).await?;
        if must_exist && old.is_none() {
            return Err(ServiceError::not_found("collaborator", account.to_string()));
        }
        if old.is_none() {
            if let Some(on_account) = &on_account {
                require(on_account, &Rights::from([Right::OrganizationAddAsCollaborator]))?;
            }
        }
        let old = old.unwrap_or_default();

        let caller = self.authz.rights_in_tx(tx.as_mut(), &info, entity).await?;
        let delta = check_delta(&caller, &old, &rights)?;
        ensure_collaborator_remains(tx.as_mut(), entity, account, &delta.removed).await?;

        tx.set_member(account, entity, &rights.implied()).await?;

        let mut affected = vec![account.clone()];
        if account.kind() == EntityKind::Organization {
            affected.extend(tx.find_members(account).await?.into_iter().map(|(m, _)| m));
        }
        tx.commit().await?;

        self.authz.invalidate(&affected).await;
        ctx.forget_rights();
        tracing::info!(
            entity = %entity,
            account = %account,
            added = %delta.added,
            removed = %delta.removed,
            "Collaborator rights changed"
        );
        Ok(())
    }
}

fn api_keys_right(kind: EntityKind) -> Result<Right, ServiceError> {
    Right::settings_api_keys(kind).ok_or_else(|| {
        ServiceError::invalid_argument("entity", format!("a {} has no API keys", kind))
    })
}

fn collaborators_right(kind: EntityKind) -> Result<Right, ServiceError> {
    Right::settings_collaborators(kind).ok_or(ServiceError::InvalidMembership {
        account: EntityKind::User,
        entity: kind,
    })
}

fn check_assignable(rights: &Rights, kind: EntityKind) -> Result<(), ServiceError> {
    let invalid = rights.sub(&Rights::assignable_for(kind));
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::InvalidRights { rights: invalid })
    }
}

async fn ensure_exists(tx: &mut dyn StoreTx, ids: &EntityId) -> Result<(), ServiceError> {
    let exists = match ids {
        EntityId::User(id) => tx.get_user(id, false).await?.is_some(),
        EntityId::EndDevice(_) => false,
        other => tx.get_entity(other, false).await?.is_some(),
    };
    if exists {
        Ok(())
    } else {
        Err(ServiceError::not_found(ids.kind().as_str(), ids.id()))
    }
}

async fn owned_key(
    tx: &mut dyn StoreTx,
    entity: &EntityId,
    key_id: &str,
) -> Result<ApiKey, ServiceError> {
    match tx.get_api_key(key_id).await? {
        Some(key) if &key.entity == entity => Ok(key),
        _ => Err(ServiceError::not_found("api_key", key_id)),
    }
}
