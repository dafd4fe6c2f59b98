//! Transactional store capability consumed by the authorization core and the
//! registries.
//!
//! Every operation runs inside a [`StoreTx`] obtained from [`Store::begin`].
//! A transaction is committed with [`StoreTx::commit`]; dropping it without
//! committing rolls every write back.

mod memory;
mod postgres;

use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::BTreeMap;

use crate::models::{
    AccessToken, ApiKey, EmailValidation, Entity, EntityId, EntityKind, Invitation,
    MembershipChain, Page, Pagination, Rights, User, UserSession,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait StoreTx: Send {
    // ==================== Memberships ====================

    /// Rights `account` holds directly on `entity`.
    async fn get_member(
        &mut self,
        account: &EntityId,
        entity: &EntityId,
    ) -> Result<Option<Rights>, AppError>;

    /// Every account that is a direct member of `entity`.
    async fn find_members(&mut self, entity: &EntityId) -> Result<Vec<(EntityId, Rights)>, AppError>;

    /// IDs of entities of `kind` the account is a member of. Indirect
    /// memberships go through organizations the account is a member of.
    async fn find_memberships(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
        include_indirect: bool,
    ) -> Result<Vec<EntityId>, AppError>;

    /// Direct and organization-mediated paths from `account` to the given entities.
    async fn find_account_membership_chains(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<MembershipChain>, AppError>;

    /// Upserts a membership; empty rights delete it.
    async fn set_member(
        &mut self,
        account: &EntityId,
        entity: &EntityId,
        rights: &Rights,
    ) -> Result<(), AppError>;

    /// Direct rights of `account` on every entity of `kind`, keyed by entity ID.
    async fn find_member_rights(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
    ) -> Result<BTreeMap<String, Rights>, AppError>;

    /// Takes the row lock of `entity` until the transaction ends.
    async fn lock_entity(&mut self, entity: &EntityId) -> Result<(), AppError>;

    // ==================== Registry ====================

    async fn create_entity(&mut self, entity: &Entity) -> Result<(), AppError>;

    async fn get_entity(
        &mut self,
        ids: &EntityId,
        include_deleted: bool,
    ) -> Result<Option<Entity>, AppError>;

    async fn update_entity(&mut self, entity: &Entity) -> Result<(), AppError>;

    /// Hard delete with memberships and API keys.
    async fn purge_entity(&mut self, ids: &EntityId) -> Result<(), AppError>;

    async fn list_entities(
        &mut self,
        kind: EntityKind,
        ids: &[String],
        include_deleted: bool,
        pagination: &Pagination,
    ) -> Result<Page<Entity>, AppError>;

    /// Whether the entity exists, deleted or not. End devices are checked
    /// through their application.
    async fn entity_exists(&mut self, ids: &EntityId) -> Result<bool, AppError> {
        match ids.rights_holder() {
            EntityId::User(id) => Ok(self.get_user(&id, true).await?.is_some()),
            holder => Ok(self.get_entity(&holder, true).await?.is_some()),
        }
    }

    // ==================== Users ====================

    async fn create_user(&mut self, user: &User) -> Result<(), AppError>;

    async fn get_user(&mut self, user_id: &str, include_deleted: bool)
    -> Result<Option<User>, AppError>;

    async fn get_user_by_primary_email(&mut self, email: &str) -> Result<Option<User>, AppError>;

    async fn update_user(&mut self, user: &User) -> Result<(), AppError>;

    // ==================== API keys ====================

    async fn create_api_key(&mut self, key: &ApiKey) -> Result<(), AppError>;

    async fn get_api_key(&mut self, id: &str) -> Result<Option<ApiKey>, AppError>;

    async fn find_api_keys(&mut self, entity: &EntityId) -> Result<Vec<ApiKey>, AppError>;

    async fn update_api_key(&mut self, key: &ApiKey) -> Result<(), AppError>;

    async fn delete_api_key(&mut self, id: &str) -> Result<(), AppError>;

    // ==================== Sessions ====================

    async fn create_session(&mut self, session: &UserSession) -> Result<(), AppError>;

    async fn get_session(&mut self, session_id: &str) -> Result<Option<UserSession>, AppError>;

    async fn delete_session(&mut self, session_id: &str) -> Result<(), AppError>;

    /// Returns the number of sessions removed.
    async fn delete_user_sessions(&mut self, user_id: &str) -> Result<u64, AppError>;

    // ==================== OAuth access tokens ====================

    async fn create_access_token(&mut self, token: &AccessToken) -> Result<(), AppError>;

    async fn get_access_token(&mut self, id: &str) -> Result<Option<AccessToken>, AppError>;

    async fn find_access_tokens(
        &mut self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Vec<AccessToken>, AppError>;

    async fn delete_access_token(&mut self, id: &str) -> Result<(), AppError>;

    // ==================== Email validations ====================

    /// Fails with `Conflict` when an unused validation exists for the same
    /// entity and address.
    async fn create_validation(&mut self, validation: &EmailValidation) -> Result<(), AppError>;

    async fn get_validation(&mut self, id: &str) -> Result<Option<EmailValidation>, AppError>;

    /// Unused validations of `entity`, expired or not.
    async fn find_pending_validations(
        &mut self,
        entity: &EntityId,
    ) -> Result<Vec<EmailValidation>, AppError>;

    async fn update_validation(&mut self, validation: &EmailValidation) -> Result<(), AppError>;

    async fn delete_validation(&mut self, id: &str) -> Result<(), AppError>;

    // ==================== Invitations ====================

    async fn create_invitation(&mut self, invitation: &Invitation) -> Result<(), AppError>;

    async fn get_invitation(&mut self, email: &str) -> Result<Option<Invitation>, AppError>;

    async fn get_invitation_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, AppError>;

    async fn list_invitations(&mut self, pagination: &Pagination)
    -> Result<Page<Invitation>, AppError>;

    async fn update_invitation(&mut self, invitation: &Invitation) -> Result<(), AppError>;

    async fn delete_invitation(&mut self, email: &str) -> Result<(), AppError>;

    // ==================== Transaction ====================

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Error for a write that targets a missing row.
pub(crate) fn missing(what: &str, id: impl std::fmt::Display) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} `{}` not found", what, id))
}

/// Error for an insert that collides with an existing row.
pub(crate) fn duplicate(what: &str, id: impl std::fmt::Display) -> AppError {
    AppError::Conflict(anyhow::anyhow!("{} `{}` already exists", what, id))
}

/// Error for a membership between kinds that can not be related.
pub(crate) fn illegal_membership(account: &EntityId, entity: &EntityId) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "a {} can not be a member of a {}",
        account.kind(),
        entity.kind()
    ))
}
