//! Registry of applications, clients, gateways and organizations.

use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::auth::{ensure_collaborator_remains, AuthInfo, Authorizer, RequestContext};
use crate::config::UserRightsConfig;
use crate::dtos::registry::{
    ClientSettings, CreateEntityRequest, GatewaySettings, UpdateEntityRequest,
};
use crate::models::{
    carry_validation, Entity, EntityDetails, EntityId, EntityKind, Page, Pagination, Right,
    Rights, State,
};
use crate::services::store::{Store, StoreTx};
use crate::services::{PolicyService, ServiceError};

#[derive(Clone)]
pub struct RegistryService {
    store: Arc<dyn Store>,
    authz: Authorizer,
    user_rights: UserRightsConfig,
}

impl RegistryService {
    pub fn new(store: Arc<dyn Store>, authz: Authorizer, user_rights: UserRightsConfig) -> Self {
        Self {
            store,
            authz,
            user_rights,
        }
    }

    /// Creates the entity and makes the owner its first collaborator with
    /// every right of the kind.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        req: CreateEntityRequest,
    ) -> Result<Entity, ServiceError> {
        req.validate()?;
        PolicyService::validate_id(&req.id)?;
        let ids = registry_id(kind, req.id.clone())?;
        let owner = req.owner.clone();
        let create_right = Right::create_as(owner.kind(), kind).ok_or(
            ServiceError::InvalidMembership {
                account: owner.kind(),
                entity: kind,
            },
        )?;

        let info = self.authz.authenticated(ctx).await?;
        if !info.is_admin && !self.creation_allowed(kind) {
            tracing::info!(kind = %kind, "Entity creation restricted to admins");
            return Err(ServiceError::CreationRestricted { kind });
        }
        self.authz.require(ctx, &owner, &[create_right]).await?;
        check_admin_fields(&info, req.client.as_ref())?;

        let mut entity = Entity::new(ids.clone(), req.name, req.description)
            .ok_or_else(|| ServiceError::invalid_argument("kind", "not a registry kind"))?;
        entity.contact_info = carry_validation(&[], req.contact_info);
        if let Some(gateway) = req.gateway {
            apply_gateway(&mut entity.details, gateway)?;
        }
        if let EntityDetails::Client { state, .. } = &mut entity.details {
            *state = if info.is_admin {
                State::Approved
            } else {
                State::Requested
            };
        }
        if let Some(client) = req.client {
            apply_client(&mut entity.details, client)?;
        }

        let mut tx = self.store.begin().await?;
        if tx.get_entity(&ids, true).await?.is_some() {
            return Err(ServiceError::already_exists(kind.as_str(), ids.id()));
        }
        if !account_exists(tx.as_mut(), &owner).await? {
            return Err(ServiceError::not_found(owner.kind().as_str(), owner.id()));
        }
        tx.create_entity(&entity).await?;
        let owner_rights = Right::all_of(kind)
            .map(|all| Rights::from([all]).implied())
            .unwrap_or_default();
        tx.set_member(&owner, &ids, &owner_rights).await?;
        let affected = affected_accounts(tx.as_mut(), vec![owner.clone()]).await?;
        tx.commit().await?;

        self.authz.invalidate(&affected).await;
        ctx.forget_rights();
        tracing::info!(entity = %ids, owner = %owner, "Entity created");
        Ok(entity)
    }

    pub async fn get(&self, ctx: &RequestContext, ids: &EntityId) -> Result<Entity, ServiceError> {
        self.authz.require(ctx, ids, &[Right::info(ids.kind())]).await?;
        let mut tx = self.store.begin().await?;
        tx.get_entity(ids, false)
            .await?
            .ok_or_else(|| ServiceError::not_found(ids.kind().as_str(), ids.id()))
    }

    /// Entities of `kind` the collaborator is a direct or indirect member of.
    /// Without a collaborator the caller's own account is used.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        collaborator: Option<EntityId>,
        include_deleted: bool,
        pagination: &Pagination,
    ) -> Result<Page<Entity>, ServiceError> {
        let info = self.authz.authenticated(ctx).await?;
        let collaborator = match collaborator.or_else(|| info.principal.clone()) {
            Some(account) if account.is_account() => account,
            _ => {
                return Err(ServiceError::invalid_argument(
                    "collaborator",
                    "a user or organization is required",
                ))
            }
        };
        let list_right = Right::list_as(collaborator.kind(), kind).ok_or(
            ServiceError::InvalidMembership {
                account: collaborator.kind(),
                entity: kind,
            },
        )?;
        if include_deleted && !info.is_admin {
            return Err(ServiceError::AdminOnly {
                field: "include_deleted",
            });
        }
        self.authz.require(ctx, &collaborator, &[list_right]).await?;

        let mut tx = self.store.begin().await?;
        let ids: Vec<String> = tx
            .find_memberships(&collaborator, kind, true)
            .await?
            .iter()
            .map(|ids| ids.id().to_string())
            .collect();
        let page = tx
            .list_entities(kind, &ids, include_deleted, pagination)
            .await?;
        Ok(page)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        ids: &EntityId,
        req: UpdateEntityRequest,
    ) -> Result<Entity, ServiceError> {
        req.validate()?;
        let info = self.authz.authenticated(ctx).await?;
        self.authz
            .require(ctx, ids, &[Right::settings_basic(ids.kind())])
            .await?;
        check_admin_fields(&info, req.client.as_ref())?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(ids).await?;
        let mut entity = tx
            .get_entity(ids, false)
            .await?
            .ok_or_else(|| ServiceError::not_found(ids.kind().as_str(), ids.id()))?;

        if let Some(name) = req.name {
            entity.name = name;
        }
        if let Some(description) = req.description {
            entity.description = description;
        }
        if let Some(contact_info) = req.contact_info {
            entity.contact_info = carry_validation(&entity.contact_info, contact_info);
        }
        if let Some(gateway) = req.gateway {
            apply_gateway(&mut entity.details, gateway)?;
        }
        if let Some(client) = req.client {
            apply_client(&mut entity.details, client)?;
        }
        entity.updated_at = Utc::now();
        tx.update_entity(&entity).await?;
        tx.commit().await?;

        tracing::info!(entity = %ids, "Entity updated");
        Ok(entity)
    }

    /// Soft delete. Memberships and API keys are kept for a restore.
    pub async fn delete(&self, ctx: &RequestContext, ids: &EntityId) -> Result<(), ServiceError> {
        self.authz.require(ctx, ids, &[Right::delete(ids.kind())]).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(ids).await?;
        let mut entity = tx
            .get_entity(ids, false)
            .await?
            .ok_or_else(|| ServiceError::not_found(ids.kind().as_str(), ids.id()))?;
        let now = Utc::now();
        entity.deleted_at = Some(now);
        entity.updated_at = now;
        tx.update_entity(&entity).await?;
        tx.commit().await?;

        tracing::info!(entity = %ids, "Entity deleted");
        Ok(())
    }

    pub async fn restore(&self, ctx: &RequestContext, ids: &EntityId) -> Result<Entity, ServiceError> {
        self.authz.require(ctx, ids, &[Right::delete(ids.kind())]).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(ids).await?;
        let mut entity = tx
            .get_entity(ids, true)
            .await?
            .ok_or_else(|| ServiceError::not_found(ids.kind().as_str(), ids.id()))?;
        if !entity.is_deleted() {
            return Err(ServiceError::NotDeleted {
                kind: ids.kind(),
                id: ids.id().to_string(),
            });
        }
        entity.deleted_at = None;
        entity.updated_at = Utc::now();
        tx.update_entity(&entity).await?;
        tx.commit().await?;

        tracing::info!(entity = %ids, "Entity restored");
        Ok(entity)
    }

    /// Hard delete with memberships and API keys. Admin only.
    pub async fn purge(&self, ctx: &RequestContext, ids: &EntityId) -> Result<(), ServiceError> {
        let info = self.authz.authenticated(ctx).await?;
        if !info.is_admin {
            tracing::info!(entity = %ids, "Purge refused for non-admin");
            return Err(ServiceError::AdminRequired);
        }

        let mut tx = self.store.begin().await?;
        tx.lock_entity(ids).await?;
        if tx.get_entity(ids, true).await?.is_none() {
            return Err(ServiceError::not_found(ids.kind().as_str(), ids.id()));
        }
        let members = tx
            .find_members(ids)
            .await?
            .into_iter()
            .map(|(account, _)| account)
            .collect();
        let mut affected = affected_accounts(tx.as_mut(), members).await?;
        if ids.kind() == EntityKind::Organization {
            ensure_owned_entities_keep_owner(tx.as_mut(), ids).await?;
            affected.push(ids.clone());
        }
        tx.purge_entity(ids).await?;
        tx.commit().await?;

        self.authz.invalidate(&affected).await;
        tracing::info!(entity = %ids, "Entity purged");
        Ok(())
    }

    fn creation_allowed(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Application => self.user_rights.create_applications,
            EntityKind::Client => self.user_rights.create_clients,
            EntityKind::Gateway => self.user_rights.create_gateways,
            EntityKind::Organization => self.user_rights.create_organizations,
            EntityKind::User | EntityKind::EndDevice => false,
        }
    }
}

fn registry_id(kind: EntityKind, id: String) -> Result<EntityId, ServiceError> {
    if !EntityKind::REGISTRY.contains(&kind) {
        return Err(ServiceError::invalid_argument("kind", "not a registry kind"));
    }
    EntityId::new(kind, id).ok_or_else(|| ServiceError::invalid_argument("kind", "not a registry kind"))
}

async fn account_exists(tx: &mut dyn StoreTx, account: &EntityId) -> Result<bool, ServiceError> {
    Ok(match account {
        EntityId::User(id) => tx.get_user(id, false).await?.is_some(),
        other => tx.get_entity(other, false).await?.is_some(),
    })
}

/// Purging an organization drops its memberships, none of which may be the
/// last owner of an entity.
async fn ensure_owned_entities_keep_owner(
    tx: &mut dyn StoreTx,
    organization: &EntityId,
) -> Result<(), ServiceError> {
    let kinds = EntityKind::REGISTRY
        .into_iter()
        .filter(|kind| organization.kind().can_be_member_of(*kind));
    for kind in kinds {
        for (id, rights) in tx.find_member_rights(organization, kind).await? {
            let Some(entity) = EntityId::new(kind, id) else {
                continue;
            };
            tx.lock_entity(&entity).await?;
            ensure_collaborator_remains(tx, &entity, organization, &rights.implied()).await?;
        }
    }
    Ok(())
}

/// The accounts plus the members of every organization among them; their
/// cached memberships change together.
pub(crate) async fn affected_accounts(
    tx: &mut dyn StoreTx,
    accounts: Vec<EntityId>,
) -> Result<Vec<EntityId>, ServiceError> {
    let mut affected = accounts.clone();
    for account in accounts.iter().filter(|a| a.kind() == EntityKind::Organization) {
        for (member, _) in tx.find_members(account).await? {
            if !affected.contains(&member) {
                affected.push(member);
            }
        }
    }
    Ok(affected)
}

fn check_admin_fields(info: &AuthInfo, client: Option<&ClientSettings>) -> Result<(), ServiceError> {
    if info.is_admin {
        return Ok(());
    }
    let Some(client) = client else {
        return Ok(());
    };
    let field = if client.state.is_some() {
        Some("state")
    } else if client.state_description.is_some() {
        Some("state_description")
    } else if client.skip_authorization.is_some() {
        Some("skip_authorization")
    } else if client.endorsed.is_some() {
        Some("endorsed")
    } else {
        None
    };
    match field {
        Some(field) => {
            tracing::info!(field, "Non-admin attempted to change an admin-only field");
            Err(ServiceError::AdminOnly { field })
        }
        None => Ok(()),
    }
}

fn apply_gateway(details: &mut EntityDetails, settings: GatewaySettings) -> Result<(), ServiceError> {
    let EntityDetails::Gateway {
        eui,
        status_public,
        location_public,
    } = details
    else {
        return Err(ServiceError::invalid_argument("gateway", "not a gateway"));
    };
    if let Some(value) = settings.eui {
        if value.len() != 16 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ServiceError::invalid_argument("eui", "must be 8 bytes in hex"));
        }
        *eui = Some(value.to_ascii_uppercase());
    }
    if let Some(value) = settings.status_public {
        *status_public = value;
    }
    if let Some(value) = settings.location_public {
        *location_public = value;
    }
    Ok(())
}

fn apply_client(details: &mut EntityDetails, settings: ClientSettings) -> Result<(), ServiceError> {
    let EntityDetails::Client {
        state,
        state_description,
        rights,
        grants,
        skip_authorization,
        endorsed,
        ..
    } = details
    else {
        return Err(ServiceError::invalid_argument("client", "not a client"));
    };
    if let Some(value) = settings.rights {
        *rights = value;
    }
    if let Some(value) = settings.grants {
        *grants = value;
    }
    if let Some(value) = settings.state {
        *state = value;
    }
    if let Some(value) = settings.state_description {
        *state_description = value;
    }
    if let Some(value) = settings.skip_authorization {
        *skip_authorization = value;
    }
    if let Some(value) = settings.endorsed {
        *endorsed = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::models::{ApiKey, User};
    use crate::services::store::MemoryStore;
    use crate::utils::{generate_secret, hash_secret};

    struct Fixture {
        store: Arc<MemoryStore>,
        service: RegistryService,
        user_key: String,
        admin_key: String,
    }

    async fn fixture(user_rights: UserRightsConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user_secret = generate_secret();
        let admin_secret = generate_secret();
        let mut tx = store.begin().await.unwrap();
        tx.create_user(&User::new(
            "u1".into(),
            "U1".into(),
            "u1@example.com".into(),
            "hash".into(),
            State::Approved,
        ))
        .await
        .unwrap();
        let mut admin = User::new(
            "root-user".into(),
            "Admin".into(),
            "admin@example.com".into(),
            "hash".into(),
            State::Approved,
        );
        admin.admin = true;
        tx.create_user(&admin).await.unwrap();
        tx.create_api_key(&ApiKey::new(
            "K1".into(),
            hash_secret(&user_secret),
            EntityId::user("u1"),
            String::new(),
            Rights::from([Right::UserAll]),
            None,
        ))
        .await
        .unwrap();
        tx.create_api_key(&ApiKey::new(
            "K2".into(),
            hash_secret(&admin_secret),
            EntityId::user("root-user"),
            String::new(),
            Rights::from([Right::All]),
            None,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let authz = Authorizer::new(store.clone(), AuthConfig::default(), None);
        Fixture {
            service: RegistryService::new(store.clone(), authz, user_rights),
            store,
            user_key: format!("Bearer AK.K1.{}", user_secret),
            admin_key: format!("Bearer AK.K2.{}", admin_secret),
        }
    }

    fn ctx(token: &str) -> RequestContext {
        RequestContext::new(Some(token.to_string()))
    }

    fn create_request(id: &str, owner: EntityId) -> CreateEntityRequest {
        CreateEntityRequest {
            id: id.into(),
            owner,
            name: "Name".into(),
            description: String::new(),
            contact_info: Vec::new(),
            gateway: None,
            client: None,
        }
    }

    #[tokio::test]
    async fn test_create_makes_owner_sole_collaborator() {
        let f = fixture(UserRightsConfig::default()).await;
        let created = f
            .service
            .create(&ctx(&f.user_key), EntityKind::Application, create_request("foo", EntityId::user("u1")))
            .await
            .unwrap();
        assert_eq!(created.ids, EntityId::application("foo"));

        let mut tx = f.store.begin().await.unwrap();
        let members = tx.find_members(&created.ids).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, EntityId::user("u1"));
        assert!(members[0].1.contains(Right::ApplicationAll));
        drop(tx);

        let page = f
            .service
            .list(&ctx(&f.user_key), EntityKind::Application, None, false, &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].ids, created.ids);
    }

    #[tokio::test]
    async fn test_duplicate_and_reserved_ids() {
        let f = fixture(UserRightsConfig::default()).await;
        let c = ctx(&f.user_key);
        f.service
            .create(&c, EntityKind::Gateway, create_request("gw-1", EntityId::user("u1")))
            .await
            .unwrap();
        let err = f
            .service
            .create(&c, EntityKind::Gateway, create_request("gw-1", EntityId::user("u1")))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "gateway_already_exists");

        let err = f
            .service
            .create(&c, EntityKind::Gateway, create_request("admin", EntityId::user("u1")))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "reserved_id");
    }

    #[tokio::test]
    async fn test_creation_restricted_unless_admin() {
        let f = fixture(UserRightsConfig {
            create_clients: false,
            ..UserRightsConfig::default()
        })
        .await;
        let err = f
            .service
            .create(&ctx(&f.user_key), EntityKind::Client, create_request("c1", EntityId::user("u1")))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "client_creation_restricted");

        let client = f
            .service
            .create(&ctx(&f.admin_key), EntityKind::Client, create_request("c1", EntityId::user("u1")))
            .await
            .unwrap();
        assert_eq!(client.client_state().map(|(s, _)| s), Some(State::Approved));
    }

    #[tokio::test]
    async fn test_client_state_is_admin_only() {
        let f = fixture(UserRightsConfig::default()).await;
        let c = ctx(&f.user_key);
        let client = f
            .service
            .create(&c, EntityKind::Client, create_request("c1", EntityId::user("u1")))
            .await
            .unwrap();
        assert_eq!(client.client_state().map(|(s, _)| s), Some(State::Requested));

        let err = f
            .service
            .update(
                &ctx(&f.user_key),
                &client.ids,
                UpdateEntityRequest {
                    client: Some(ClientSettings {
                        state: Some(State::Approved),
                        ..ClientSettings::default()
                    }),
                    ..UpdateEntityRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "admin_only");
    }

    #[tokio::test]
    async fn test_delete_restore_purge() {
        let f = fixture(UserRightsConfig::default()).await;
        let app = f
            .service
            .create(&ctx(&f.user_key), EntityKind::Application, create_request("foo", EntityId::user("u1")))
            .await
            .unwrap()
            .ids;

        let err = f.service.restore(&ctx(&f.user_key), &app).await.unwrap_err();
        assert_eq!(err.name(), "application_not_deleted");

        f.service.delete(&ctx(&f.user_key), &app).await.unwrap();
        let err = f.service.get(&ctx(&f.user_key), &app).await.unwrap_err();
        assert_eq!(err.name(), "application_not_found");

        f.service.restore(&ctx(&f.user_key), &app).await.unwrap();
        f.service.get(&ctx(&f.user_key), &app).await.unwrap();

        let err = f.service.purge(&ctx(&f.user_key), &app).await.unwrap_err();
        assert_eq!(err.name(), "admin_required");
        f.service.purge(&ctx(&f.admin_key), &app).await.unwrap();

        let mut tx = f.store.begin().await.unwrap();
        assert!(tx.get_entity(&app, true).await.unwrap().is_none());
        assert!(tx.find_members(&app).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purging_organization_keeps_owned_entities_owned() {
        let f = fixture(UserRightsConfig::default()).await;
        let org = f
            .service
            .create(&ctx(&f.user_key), EntityKind::Organization, create_request("o1", EntityId::user("u1")))
            .await
            .unwrap()
            .ids;
        let app = EntityId::application("app1");
        let owner = Rights::from([Right::ApplicationAll]).implied();
        {
            let mut tx = f.store.begin().await.unwrap();
            tx.create_entity(&Entity::new(app.clone(), "App".into(), String::new()).unwrap())
                .await
                .unwrap();
            tx.set_member(&org, &app, &owner).await.unwrap();
            tx.commit().await.unwrap();
        }

        let err = f.service.purge(&ctx(&f.admin_key), &org).await.unwrap_err();
        assert_eq!(err.name(), "application_needs_collaborator");
        {
            let mut tx = f.store.begin().await.unwrap();
            assert!(tx.get_entity(&org, false).await.unwrap().is_some());
            assert_eq!(tx.find_members(&app).await.unwrap().len(), 1);
            tx.set_member(&EntityId::user("u1"), &app, &owner).await.unwrap();
            tx.commit().await.unwrap();
        }

        f.service.purge(&ctx(&f.admin_key), &org).await.unwrap();
        let mut tx = f.store.begin().await.unwrap();
        assert!(tx.get_entity(&org, true).await.unwrap().is_none());
        let members = tx.find_members(&app).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, EntityId::user("u1"));
    }

    #[tokio::test]
    async fn test_organizations_are_owned_by_users_only() {
        let f = fixture(UserRightsConfig::default()).await;
        let err = f
            .service
            .create(
                &ctx(&f.admin_key),
                EntityKind::Organization,
                create_request("org-2", EntityId::organization("org-1")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "invalid_membership");
    }

    #[tokio::test]
    async fn test_gateway_eui_is_normalized() {
        let f = fixture(UserRightsConfig::default()).await;
        let mut req = create_request("gw", EntityId::user("u1"));
        req.gateway = Some(GatewaySettings {
            eui: Some("70b3d57ed0000001".into()),
            status_public: Some(true),
            location_public: None,
        });
        let gateway = f
            .service
            .create(&ctx(&f.user_key), EntityKind::Gateway, req)
            .await
            .unwrap();
        assert_eq!(
            gateway.details,
            EntityDetails::Gateway {
                eui: Some("70B3D57ED0000001".into()),
                status_public: true,
                location_public: false,
            }
        );
    }
}
