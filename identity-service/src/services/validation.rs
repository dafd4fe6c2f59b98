//! Contact-info validation: single-use tokens proving control over an email
//! address of a user or a registry entity.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;

use crate::auth::{Authorizer, RequestContext};
use crate::config::ValidationConfig;
use crate::models::{ContactMethod, EmailValidation, EntityId, Right};
use crate::services::email::{EmailJob, EmailQueue};
use crate::services::store::{Store, StoreTx};
use crate::services::ServiceError;
use crate::utils::{generate_id, generate_secret, hash_token, verify_token};

/// A validation together with the plaintext token to mail out.
pub(crate) struct IssuedValidation {
    pub validation: EmailValidation,
    pub token: String,
}

impl IssuedValidation {
    pub fn into_job(self) -> EmailJob {
        EmailJob::Validation {
            to: self.validation.address,
            validation_id: self.validation.id,
            token: self.token,
        }
    }
}

/// Persists a fresh validation for every address. A concurrent request that
/// already created one for the same address wins.
pub(crate) async fn issue_validations(
    tx: &mut dyn StoreTx,
    entity: &EntityId,
    addresses: &[String],
    config: &ValidationConfig,
    now: DateTime<Utc>,
) -> Result<Vec<IssuedValidation>, ServiceError> {
    let mut issued = Vec::with_capacity(addresses.len());
    for address in addresses {
        let token = generate_secret();
        let validation = EmailValidation {
            id: generate_id(),
            token_hash: hash_token(&token),
            address: address.clone(),
            entity: entity.clone(),
            created_at: now,
            updated_at: now,
            expires_at: now + config.token_ttl(),
            used_at: None,
        };
        match tx.create_validation(&validation).await {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => {
                tracing::info!(entity = %entity, "Validation created concurrently");
                return Err(ServiceError::ValidationRequestForbidden {
                    retry_interval: config.retry_interval_seconds,
                });
            }
            Err(e) => return Err(e.into()),
        }
        issued.push(IssuedValidation { validation, token });
    }
    Ok(issued)
}

#[derive(Clone)]
pub struct ValidationService {
    store: Arc<dyn Store>,
    authz: Authorizer,
    emails: EmailQueue,
    config: ValidationConfig,
}

impl ValidationService {
    pub fn new(
        store: Arc<dyn Store>,
        authz: Authorizer,
        emails: EmailQueue,
        config: ValidationConfig,
    ) -> Self {
        Self {
            store,
            authz,
            emails,
            config,
        }
    }

    /// Issues or refreshes the validations of every unvalidated email address
    /// of `entity`. Tokens only travel by email.
    pub async fn request_validation(
        &self,
        ctx: &RequestContext,
        entity: &EntityId,
    ) -> Result<Vec<EmailValidation>, ServiceError> {
        if matches!(entity, EntityId::EndDevice(_)) {
            return Err(ServiceError::invalid_argument(
                "entity",
                "end devices have no contact info",
            ));
        }
        self.authz
            .require(ctx, entity, &[Right::settings_basic(entity.kind())])
            .await?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        tx.lock_entity(entity).await?;

        let addresses = unvalidated_addresses(tx.as_mut(), entity).await?;
        if addresses.is_empty() {
            return Err(ServiceError::NoContactInfoToValidate);
        }

        let pending = tx.find_pending_validations(entity).await?;
        let mut fresh = Vec::new();
        let mut refreshed = Vec::new();
        for address in &addresses {
            let existing = pending.iter().find(|v| &v.address == address);
            match existing {
                Some(active) if active.is_active(now) => {
                    if now - active.updated_at < self.config.retry_interval() {
                        tracing::info!(entity = %entity, "Validation requested too soon");
                        return Err(ServiceError::ValidationRequestForbidden {
                            retry_interval: self.config.retry_interval_seconds,
                        });
                    }
                    let token = generate_secret();
                    let mut validation = active.clone();
                    validation.token_hash = hash_token(&token);
                    validation.updated_at = now;
                    validation.expires_at = now + self.config.token_ttl();
                    tx.update_validation(&validation).await?;
                    refreshed.push(IssuedValidation { validation, token });
                }
                Some(expired) => {
                    tx.delete_validation(&expired.id).await?;
                    fresh.push(address.clone());
                }
                None => fresh.push(address.clone()),
            }
        }

        let mut issued = issue_validations(tx.as_mut(), entity, &fresh, &self.config, now).await?;
        issued.extend(refreshed);
        tx.commit().await?;

        tracing::info!(entity = %entity, count = issued.len(), "Contact info validation requested");
        let validations = issued.iter().map(|i| i.validation.clone()).collect();
        for item in issued {
            self.emails.submit(item.into_job());
        }
        Ok(validations)
    }

    /// Consumes a validation and marks its address validated.
    pub async fn validate(&self, id: &str, token: &str) -> Result<(), ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut validation = tx
            .get_validation(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("validation", id))?;

        if !verify_token(token, &validation.token_hash) {
            tracing::info!(validation_id = %id, "Validation token mismatch");
            return Err(ServiceError::ValidationTokenMismatch);
        }
        if validation.is_used() {
            return Err(ServiceError::ValidationAlreadyUsed);
        }
        if validation.is_expired(now) {
            return Err(ServiceError::ValidationExpired);
        }

        tx.lock_entity(&validation.entity).await?;
        validation.used_at = Some(now);
        validation.expires_at = now;
        validation.updated_at = now;
        tx.update_validation(&validation).await?;

        match &validation.entity {
            EntityId::User(user_id) => {
                let mut user = tx
                    .get_user(user_id, false)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("user", user_id.as_str()))?;
                user.mark_validated(&validation.address, now);
                user.updated_at = now;
                tx.update_user(&user).await?;
            }
            ids => {
                let mut entity = tx
                    .get_entity(ids, false)
                    .await?
                    .ok_or_else(|| ServiceError::not_found(ids.kind().as_str(), ids.id()))?;
                for info in entity.contact_info.iter_mut() {
                    if info.value == validation.address && info.needs_validation() {
                        info.validated_at = Some(now);
                    }
                }
                entity.updated_at = now;
                tx.update_entity(&entity).await?;
            }
        }
        tx.commit().await?;

        tracing::info!(entity = %validation.entity, validation_id = %id, "Contact info validated");
        Ok(())
    }
}

async fn unvalidated_addresses(
    tx: &mut dyn StoreTx,
    entity: &EntityId,
) -> Result<Vec<String>, ServiceError> {
    match entity {
        EntityId::User(user_id) => {
            let user = tx
                .get_user(user_id, false)
                .await?
                .ok_or_else(|| ServiceError::not_found("user", user_id.as_str()))?;
            Ok(user.unvalidated_addresses())
        }
        ids => {
            let entity = tx
                .get_entity(ids, false)
                .await?
                .ok_or_else(|| ServiceError::not_found(ids.kind().as_str(), ids.id()))?;
            let mut addresses: Vec<String> = Vec::new();
            for info in entity
                .contact_info
                .iter()
                .filter(|c| c.contact_method == ContactMethod::Email && c.validated_at.is_none())
            {
                if !addresses.contains(&info.value) {
                    addresses.push(info.value.clone());
                }
            }
            Ok(addresses)
        }
    }
}
