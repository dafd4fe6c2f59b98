//! In-process store used by tests and by development runs without a database.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreTx, duplicate, illegal_membership, missing};
use crate::models::{
    AccessToken, ApiKey, EmailValidation, Entity, EntityId, EntityKind, Invitation,
    MembershipChain, Page, Pagination, Rights, User, UserSession,
};

#[derive(Debug, Clone, Default)]
struct Dataset {
    users: BTreeMap<String, User>,
    entities: BTreeMap<EntityId, Entity>,
    /// Keyed by (account, entity).
    memberships: BTreeMap<(EntityId, EntityId), Rights>,
    api_keys: BTreeMap<String, ApiKey>,
    sessions: BTreeMap<String, UserSession>,
    access_tokens: BTreeMap<String, AccessToken>,
    validations: BTreeMap<String, EmailValidation>,
    invitations: BTreeMap<String, Invitation>,
}

impl Dataset {
    fn direct_rights(&self, account: &EntityId, kind: EntityKind) -> BTreeMap<String, Rights> {
        self.memberships
            .iter()
            .filter(|((a, e), _)| a == account && e.kind() == kind)
            .map(|((_, e), rights)| (e.id().to_string(), rights.clone()))
            .collect()
    }
}

/// Store keeping every row in memory. A transaction holds the dataset lock
/// for its whole lifetime and works on a copy that replaces the shared
/// dataset on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Dataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = self.data.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Dataset>,
    working: Dataset,
}

fn sort_and_page<T>(mut items: Vec<T>, pagination: &Pagination, key: impl Fn(&T) -> String) -> Page<T> {
    items.sort_by_key(|item| key(item));
    if pagination.descending() {
        items.reverse();
    }
    let total = items.len() as u64;
    Page {
        items: pagination.apply(items),
        total,
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_member(
        &mut self,
        account: &EntityId,
        entity: &EntityId,
    ) -> Result<Option<Rights>, AppError> {
        Ok(self
            .working
            .memberships
            .get(&(account.clone(), entity.clone()))
            .cloned())
    }

    async fn find_members(&mut self, entity: &EntityId) -> Result<Vec<(EntityId, Rights)>, AppError> {
        Ok(self
            .working
            .memberships
            .iter()
            .filter(|((_, e), _)| e == entity)
            .map(|((a, _), rights)| (a.clone(), rights.clone()))
            .collect())
    }

    async fn find_memberships(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
        include_indirect: bool,
    ) -> Result<Vec<EntityId>, AppError> {
        let mut ids: Vec<EntityId> = self
            .working
            .memberships
            .keys()
            .filter(|(a, e)| a == account && e.kind() == kind)
            .map(|(_, e)| e.clone())
            .collect();
        if include_indirect && account.kind() == EntityKind::User && kind != EntityKind::Organization
        {
            let organizations = self.working.direct_rights(account, EntityKind::Organization);
            for org_id in organizations.keys() {
                let org = EntityId::Organization(org_id.clone());
                for (a, e) in self.working.memberships.keys() {
                    if *a == org && e.kind() == kind && !ids.contains(e) {
                        ids.push(e.clone());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn find_account_membership_chains(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<MembershipChain>, AppError> {
        let mut chains = Vec::new();
        for id in ids {
            let Some(entity) = EntityId::new(kind, id.clone()) else {
                continue;
            };
            if let Some(rights) = self
                .working
                .memberships
                .get(&(account.clone(), entity.clone()))
            {
                chains.push(MembershipChain::direct(
                    account.clone(),
                    entity.clone(),
                    rights.clone(),
                ));
            }
            if account.kind() != EntityKind::User || kind == EntityKind::Organization {
                continue;
            }
            for (org_id, user_rights) in self.working.direct_rights(account, EntityKind::Organization)
            {
                let org = EntityId::Organization(org_id);
                if let Some(org_rights) =
                    self.working.memberships.get(&(org.clone(), entity.clone()))
                {
                    chains.push(MembershipChain::indirect(
                        account.clone(),
                        user_rights,
                        org,
                        org_rights.clone(),
                        entity.clone(),
                    ));
                }
            }
        }
        Ok(chains)
    }

    async fn set_member(
        &mut self,
        account: &EntityId,
        entity: &EntityId,
        rights: &Rights,
    ) -> Result<(), AppError> {
        if !account.kind().can_be_member_of(entity.kind()) {
            return Err(illegal_membership(account, entity));
        }
        let key = (account.clone(), entity.clone());
        if rights.is_empty() {
            self.working.memberships.remove(&key);
        } else {
            self.working.memberships.insert(key, rights.clone());
        }
        Ok(())
    }

    async fn find_member_rights(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
    ) -> Result<BTreeMap<String, Rights>, AppError> {
        Ok(self.working.direct_rights(account, kind))
    }

    async fn lock_entity(&mut self, _entity: &EntityId) -> Result<(), AppError> {
        // The transaction already holds the dataset lock.
        Ok(())
    }

    async fn create_entity(&mut self, entity: &Entity) -> Result<(), AppError> {
        if self.working.entities.contains_key(&entity.ids) {
            return Err(duplicate(entity.ids.kind().as_str(), entity.ids.id()));
        }
        self.working
            .entities
            .insert(entity.ids.clone(), entity.clone());
        Ok(())
    }

    async fn get_entity(
        &mut self,
        ids: &EntityId,
        include_deleted: bool,
    ) -> Result<Option<Entity>, AppError> {
        Ok(self
            .working
            .entities
            .get(ids)
            .filter(|e| include_deleted || !e.is_deleted())
            .cloned())
    }

    async fn update_entity(&mut self, entity: &Entity) -> Result<(), AppError> {
        match self.working.entities.get_mut(&entity.ids) {
            Some(existing) => {
                *existing = entity.clone();
                Ok(())
            }
            None => Err(missing(entity.ids.kind().as_str(), entity.ids.id())),
        }
    }

    async fn purge_entity(&mut self, ids: &EntityId) -> Result<(), AppError> {
        if self.working.entities.remove(ids).is_none() {
            return Err(missing(ids.kind().as_str(), ids.id()));
        }
        self.working
            .memberships
            .retain(|(account, entity), _| entity != ids && account != ids);
        self.working.api_keys.retain(|_, key| key.entity != *ids);
        Ok(())
    }

    async fn list_entities(
        &mut self,
        kind: EntityKind,
        ids: &[String],
        include_deleted: bool,
        pagination: &Pagination,
    ) -> Result<Page<Entity>, AppError> {
        let items: Vec<Entity> = self
            .working
            .entities
            .values()
            .filter(|e| e.ids.kind() == kind && ids.iter().any(|id| id == e.ids.id()))
            .filter(|e| include_deleted || !e.is_deleted())
            .cloned()
            .collect();
        let order = pagination.order.clone().unwrap_or_default();
        Ok(sort_and_page(items, pagination, |e| {
            match order.trim_start_matches('-') {
                "name" => e.name.clone(),
                "created_at" => e.created_at.to_rfc3339(),
                _ => e.ids.id().to_string(),
            }
        }))
    }

    async fn create_user(&mut self, user: &User) -> Result<(), AppError> {
        if self.working.users.contains_key(&user.user_id) {
            return Err(duplicate("user", &user.user_id));
        }
        let email_taken = self.working.users.values().any(|u| {
            u.primary_email_address
                .eq_ignore_ascii_case(&user.primary_email_address)
        });
        if email_taken {
            return Err(duplicate("email", &user.primary_email_address));
        }
        self.working
            .users
            .insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(
        &mut self,
        user_id: &str,
        include_deleted: bool,
    ) -> Result<Option<User>, AppError> {
        Ok(self
            .working
            .users
            .get(user_id)
            .filter(|u| include_deleted || !u.is_deleted())
            .cloned())
    }

    async fn get_user_by_primary_email(&mut self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.primary_email_address.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), AppError> {
        let email_taken = self.working.users.values().any(|u| {
            u.user_id != user.user_id
                && u.primary_email_address
                    .eq_ignore_ascii_case(&user.primary_email_address)
        });
        if email_taken {
            return Err(duplicate("email", &user.primary_email_address));
        }
        match self.working.users.get_mut(&user.user_id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(missing("user", &user.user_id)),
        }
    }

    async fn create_api_key(&mut self, key: &ApiKey) -> Result<(), AppError> {
        if self.working.api_keys.contains_key(&key.id) {
            return Err(duplicate("api_key", &key.id));
        }
        self.working.api_keys.insert(key.id.clone(), key.clone());
        Ok(())
    }

    async fn get_api_key(&mut self, id: &str) -> Result<Option<ApiKey>, AppError> {
        Ok(self.working.api_keys.get(id).cloned())
    }

    async fn find_api_keys(&mut self, entity: &EntityId) -> Result<Vec<ApiKey>, AppError> {
        let mut keys: Vec<ApiKey> = self
            .working
            .api_keys
            .values()
            .filter(|k| k.entity == *entity)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    async fn update_api_key(&mut self, key: &ApiKey) -> Result<(), AppError> {
        match self.working.api_keys.get_mut(&key.id) {
            Some(existing) => {
                *existing = key.clone();
                Ok(())
            }
            None => Err(missing("api_key", &key.id)),
        }
    }

    async fn delete_api_key(&mut self, id: &str) -> Result<(), AppError> {
        self.working
            .api_keys
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| missing("api_key", id))
    }

    async fn create_session(&mut self, session: &UserSession) -> Result<(), AppError> {
        if self.working.sessions.contains_key(&session.session_id) {
            return Err(duplicate("session", &session.session_id));
        }
        self.working
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&mut self, session_id: &str) -> Result<Option<UserSession>, AppError> {
        Ok(self.working.sessions.get(session_id).cloned())
    }

    async fn delete_session(&mut self, session_id: &str) -> Result<(), AppError> {
        self.working
            .sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| missing("session", session_id))
    }

    async fn delete_user_sessions(&mut self, user_id: &str) -> Result<u64, AppError> {
        let before = self.working.sessions.len();
        self.working.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - self.working.sessions.len()) as u64)
    }

    async fn create_access_token(&mut self, token: &AccessToken) -> Result<(), AppError> {
        if self.working.access_tokens.contains_key(&token.id) {
            return Err(duplicate("access_token", &token.id));
        }
        self.working
            .access_tokens
            .insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token(&mut self, id: &str) -> Result<Option<AccessToken>, AppError> {
        Ok(self.working.access_tokens.get(id).cloned())
    }

    async fn find_access_tokens(
        &mut self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Vec<AccessToken>, AppError> {
        let mut tokens: Vec<AccessToken> = self
            .working
            .access_tokens
            .values()
            .filter(|t| t.user_id == user_id && t.client_id == client_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn delete_access_token(&mut self, id: &str) -> Result<(), AppError> {
        self.working
            .access_tokens
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| missing("access_token", id))
    }

    async fn create_validation(&mut self, validation: &EmailValidation) -> Result<(), AppError> {
        let pending = self.working.validations.values().any(|v| {
            v.entity == validation.entity && v.address == validation.address && !v.is_used()
        });
        if pending || self.working.validations.contains_key(&validation.id) {
            return Err(duplicate("validation", &validation.address));
        }
        self.working
            .validations
            .insert(validation.id.clone(), validation.clone());
        Ok(())
    }

    async fn get_validation(&mut self, id: &str) -> Result<Option<EmailValidation>, AppError> {
        Ok(self.working.validations.get(id).cloned())
    }

    async fn find_pending_validations(
        &mut self,
        entity: &EntityId,
    ) -> Result<Vec<EmailValidation>, AppError> {
        Ok(self
            .working
            .validations
            .values()
            .filter(|v| v.entity == *entity && !v.is_used())
            .cloned()
            .collect())
    }

    async fn update_validation(&mut self, validation: &EmailValidation) -> Result<(), AppError> {
        match self.working.validations.get_mut(&validation.id) {
            Some(existing) => {
                *existing = validation.clone();
                Ok(())
            }
            None => Err(missing("validation", &validation.id)),
        }
    }

    async fn delete_validation(&mut self, id: &str) -> Result<(), AppError> {
        self.working
            .validations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| missing("validation", id))
    }

    async fn create_invitation(&mut self, invitation: &Invitation) -> Result<(), AppError> {
        if self.working.invitations.contains_key(&invitation.email) {
            return Err(duplicate("invitation", &invitation.email));
        }
        self.working
            .invitations
            .insert(invitation.email.clone(), invitation.clone());
        Ok(())
    }

    async fn get_invitation(&mut self, email: &str) -> Result<Option<Invitation>, AppError> {
        Ok(self.working.invitations.get(email).cloned())
    }

    async fn get_invitation_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, AppError> {
        Ok(self
            .working
            .invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned())
    }

    async fn list_invitations(
        &mut self,
        pagination: &Pagination,
    ) -> Result<Page<Invitation>, AppError> {
        let items: Vec<Invitation> = self.working.invitations.values().cloned().collect();
        Ok(sort_and_page(items, pagination, |i| i.created_at.to_rfc3339()))
    }

    async fn update_invitation(&mut self, invitation: &Invitation) -> Result<(), AppError> {
        match self.working.invitations.get_mut(&invitation.email) {
            Some(existing) => {
                *existing = Invitation {
                    updated_at: Utc::now(),
                    ..invitation.clone()
                };
                Ok(())
            }
            None => Err(missing("invitation", &invitation.email)),
        }
    }

    async fn delete_invitation(&mut self, email: &str) -> Result<(), AppError> {
        self.working
            .invitations
            .remove(email)
            .map(|_| ())
            .ok_or_else(|| missing("invitation", email))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
