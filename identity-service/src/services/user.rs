//! User accounts: registration, profile, passwords.

use chrono::{Duration, Utc};
use std::sync::Arc;
use validator::Validate;

use crate::auth::{AccessMethod, Authorizer, RequestContext};
use crate::config::RegistrationConfig;
use crate::dtos::user::{CreateUserRequest, UpdatePasswordRequest, UpdateUserRequest};
use crate::models::{carry_validation, EntityId, Right, SanitizedUser, State, User};
use crate::services::email::{EmailJob, EmailQueue};
use crate::services::validation::issue_validations;
use crate::services::{PolicyService, ServiceError};
use crate::services::store::Store;
use crate::utils::{
    generate_secret, hash_password_blocking, hash_token, verify_password_blocking, Password,
};

const TEMPORARY_PASSWORD_TTL_MINUTES: i64 = 60;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    authz: Authorizer,
    emails: EmailQueue,
    registration: RegistrationConfig,
}

impl UserService {
    pub fn new(
        store: Arc<dyn Store>,
        authz: Authorizer,
        emails: EmailQueue,
        registration: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            authz,
            emails,
            registration,
        }
    }

    pub async fn register(&self, req: CreateUserRequest) -> Result<SanitizedUser, ServiceError> {
        req.validate()?;
        PolicyService::validate_id(&req.user_id)?;
        PolicyService::validate_password(&req.password, &req.user_id, &self.registration.password)?;

        let invitation_token = match (&req.invitation_token, self.registration.invitation.required) {
            (Some(token), _) => Some(token.clone()),
            (None, true) => return Err(ServiceError::InvitationTokenInvalid),
            (None, false) => None,
        };

        let password_hash = hash_password_blocking(Password::new(req.password)).await?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        if tx.get_user(&req.user_id, true).await?.is_some() {
            return Err(ServiceError::already_exists("user", req.user_id));
        }
        if tx
            .get_user_by_primary_email(&req.primary_email_address)
            .await?
            .is_some()
        {
            return Err(ServiceError::already_exists(
                "email",
                req.primary_email_address,
            ));
        }

        if let Some(token) = invitation_token {
            let mut invitation = tx
                .get_invitation_by_token_hash(&hash_token(&token))
                .await?
                .ok_or(ServiceError::InvitationTokenInvalid)?;
            if invitation.accepted_by.is_some() {
                return Err(ServiceError::InvitationTokenInvalid);
            }
            if invitation.expires_at <= now {
                return Err(ServiceError::InvitationExpired);
            }
            invitation.accepted_by = Some(req.user_id.clone());
            invitation.accepted_at = Some(now);
            invitation.updated_at = now;
            tx.update_invitation(&invitation).await?;
        }

        let state = if self.registration.admin_approval_required {
            State::Requested
        } else {
            State::Approved
        };
        let mut user = User::new(
            req.user_id,
            req.name,
            req.primary_email_address,
            password_hash.into_string(),
            state,
        );
        user.created_at = now;
        user.updated_at = now;
        tx.create_user(&user).await?;

        let issued = if self.registration.validation.required {
            issue_validations(
                tx.as_mut(),
                &user.ids(),
                &user.unvalidated_addresses(),
                &self.registration.validation,
                now,
            )
            .await?
        } else {
            Vec::new()
        };
        tx.commit().await?;

        tracing::info!(user_id = %user.user_id, state = %user.state, "User registered");
        for item in issued {
            self.emails.submit(item.into_job());
        }
        Ok(user.sanitized())
    }

    pub async fn get(&self, ctx: &RequestContext, user_id: &str) -> Result<SanitizedUser, ServiceError> {
        self.authz
            .require(ctx, &EntityId::user(user_id), &[Right::UserInfo])
            .await?;
        let mut tx = self.store.begin().await?;
        let user = tx
            .get_user(user_id, false)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", user_id))?;
        Ok(user.sanitized())
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        req: UpdateUserRequest,
    ) -> Result<SanitizedUser, ServiceError> {
        req.validate()?;
        let ids = EntityId::user(user_id);
        let info = self.authz.authenticated(ctx).await?;
        self.authz.require(ctx, &ids, &[Right::UserSettingsBasic]).await?;
        if !info.is_admin {
            let field = if req.state.is_some() {
                Some("state")
            } else if req.state_description.is_some() {
                Some("state_description")
            } else if req.admin.is_some() {
                Some("admin")
            } else {
                None
            };
            if let Some(field) = field {
                tracing::info!(user_id, field, "Non-admin attempted to change an admin-only field");
                return Err(ServiceError::AdminOnly { field });
            }
        }

        let mut tx = self.store.begin().await?;
        tx.lock_entity(&ids).await?;
        let mut user = tx
            .get_user(user_id, false)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", user_id))?;

        if let Some(name) = req.name {
            user.name = name;
        }
        if let Some(description) = req.description {
            user.description = description;
        }
        if let Some(email) = req.primary_email_address {
            if email != user.primary_email_address {
                if let Some(other) = tx.get_user_by_primary_email(&email).await? {
                    if other.user_id != user.user_id {
                        return Err(ServiceError::already_exists("email", email));
                    }
                }
                user.primary_email_address = email;
                user.primary_email_address_validated_at = None;
            }
        }
        if let Some(contact_info) = req.contact_info {
            user.contact_info = carry_validation(&user.contact_info, contact_info);
        }
        if let Some(state) = req.state {
            user.state = state;
        }
        if let Some(description) = req.state_description {
            user.state_description = description;
        }
        if let Some(admin) = req.admin {
            user.admin = admin;
        }
        user.updated_at = Utc::now();
        tx.update_user(&user).await?;
        tx.commit().await?;

        tracing::info!(user_id, "User updated");
        Ok(user.sanitized())
    }

    /// Soft delete; every session of the user ends.
    pub async fn delete(&self, ctx: &RequestContext, user_id: &str) -> Result<(), ServiceError> {
        let ids = EntityId::user(user_id);
        self.authz.require(ctx, &ids, &[Right::UserDelete]).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(&ids).await?;
        let mut user = tx
            .get_user(user_id, false)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", user_id))?;
        let now = Utc::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        tx.update_user(&user).await?;
        let sessions = tx.delete_user_sessions(user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id, sessions, "User deleted");
        Ok(())
    }

    /// Sets a new password. The old or temporary password is required unless
    /// the caller is an admin or must update its password. Every session of
    /// the user is revoked.
    pub async fn update_password(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        req: UpdatePasswordRequest,
    ) -> Result<(), ServiceError> {
        req.validate()?;
        let ids = EntityId::user(user_id);
        let info = self.authz.authenticated(ctx).await?;
        self.authz.require(ctx, &ids, &[Right::UserSettingsBasic]).await?;
        PolicyService::validate_password(&req.new, user_id, &self.registration.password)?;

        let current = {
            let mut tx = self.store.begin().await?;
            tx.get_user(user_id, false)
                .await?
                .ok_or_else(|| ServiceError::not_found("user", user_id))?
        };
        // A session opened with a temporary password must set a new one.
        let forced = info.access_method == AccessMethod::SessionToken && current.require_password_update;
        if !info.is_admin && !forced {
            let old = req.old.clone().ok_or(ServiceError::InvalidCredentials)?;
            if !password_matches(&current, old).await? {
                tracing::info!(user_id, "Password update with wrong old password");
                return Err(ServiceError::InvalidCredentials);
            }
        }
        let password_hash = hash_password_blocking(Password::new(req.new)).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(&ids).await?;
        let mut user = tx
            .get_user(user_id, false)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", user_id))?;
        let now = Utc::now();
        user.password_hash = password_hash.into_string();
        user.password_updated_at = now;
        user.require_password_update = false;
        user.temporary_password_hash = None;
        user.temporary_password_expires_at = None;
        user.updated_at = now;
        tx.update_user(&user).await?;
        let sessions = tx.delete_user_sessions(user_id).await?;
        tx.commit().await?;

        tracing::info!(user_id, sessions, "Password updated");
        Ok(())
    }

    /// Emails a one-hour temporary password to the user's primary address.
    pub async fn create_temporary_password(&self, user_id: &str) -> Result<(), ServiceError> {
        let ids = EntityId::user(user_id);
        let now = Utc::now();
        let temporary = generate_secret()[..16].to_string();
        let hash = hash_password_blocking(Password::new(temporary.clone())).await?;

        let mut tx = self.store.begin().await?;
        tx.lock_entity(&ids).await?;
        let mut user = tx
            .get_user(user_id, false)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", user_id))?;
        if user.temporary_password_expires_at.is_some_and(|at| at > now) {
            return Err(ServiceError::TemporaryPasswordStillValid);
        }
        user.temporary_password_hash = Some(hash.into_string());
        user.temporary_password_expires_at =
            Some(now + Duration::minutes(TEMPORARY_PASSWORD_TTL_MINUTES));
        user.updated_at = now;
        tx.update_user(&user).await?;
        tx.commit().await?;

        tracing::info!(user_id, "Temporary password created");
        self.emails.submit(EmailJob::TemporaryPassword {
            to: user.primary_email_address,
            user_id: user.user_id,
            password: temporary,
        });
        Ok(())
    }
}

/// Which password of the user `candidate` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PasswordMatch {
    Primary,
    Temporary,
}

pub(crate) async fn match_password(
    user: &User,
    candidate: String,
) -> Result<Option<PasswordMatch>, ServiceError> {
    if verify_password_blocking(Password::new(candidate.clone()), user.password_hash.clone()).await? {
        return Ok(Some(PasswordMatch::Primary));
    }
    let temporary = match (&user.temporary_password_hash, user.temporary_password_expires_at) {
        (Some(hash), Some(expires_at)) if expires_at > Utc::now() => hash.clone(),
        _ => return Ok(None),
    };
    if verify_password_blocking(Password::new(candidate), temporary).await? {
        return Ok(Some(PasswordMatch::Temporary));
    }
    Ok(None)
}

async fn password_matches(user: &User, candidate: String) -> Result<bool, ServiceError> {
    Ok(match_password(user, candidate).await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, InvitationConfig, ValidationConfig};
    use crate::models::{Invitation, UserSession};
    use crate::services::email::{MockEmailService, SentEmail};
    use crate::services::store::MemoryStore;
    use crate::utils::{generate_id, hash_secret};

    fn service(store: Arc<MemoryStore>, registration: RegistrationConfig) -> (UserService, MockEmailService) {
        let mail = MockEmailService::new();
        let (queue, _) = EmailQueue::start(Arc::new(mail.clone()), 8, "http://localhost".into());
        let authz = Authorizer::new(store.clone(), AuthConfig::default(), None);
        (UserService::new(store, authz, queue, registration), mail)
    }

    fn request(user_id: &str) -> CreateUserRequest {
        CreateUserRequest {
            user_id: user_id.into(),
            name: "Jane".into(),
            primary_email_address: format!("{}@example.com", user_id),
            password: "Correct-Horse-9".into(),
            invitation_token: None,
        }
    }

    async fn session_for(store: &MemoryStore, user_id: &str) -> RequestContext {
        let (ctx, _) = session_with_id(store, user_id).await;
        ctx
    }

    async fn session_with_id(store: &MemoryStore, user_id: &str) -> (RequestContext, String) {
        let secret = generate_secret();
        let session_id = generate_id();
        let mut tx = store.begin().await.unwrap();
        tx.create_session(&UserSession::new(
            session_id.clone(),
            user_id.into(),
            hash_secret(&secret),
            None,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();
        let ctx = RequestContext::new(Some(format!("Bearer SK.{}.{}", session_id, secret)));
        (ctx, session_id)
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store.clone(), RegistrationConfig::default());
        let user = service.register(request("jane")).await.unwrap();
        assert_eq!(user.state, State::Approved);

        let ctx = session_for(&store, "jane").await;
        let fetched = service.get(&ctx, "jane").await.unwrap();
        assert_eq!(fetched.primary_email_address, "jane@example.com");
        assert_eq!(fetched.name, "Jane");

        let err = service.register(request("jane")).await.unwrap_err();
        assert_eq!(err.name(), "user_already_exists");
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password_and_bad_email() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store, RegistrationConfig::default());
        let mut req = request("jane");
        req.password = "short".into();
        let err = service.register(req).await.unwrap_err();
        assert_eq!(err.name(), "password_too_short");

        let mut req = request("jane");
        req.primary_email_address = "not-an-email".into();
        let err = service.register(req).await.unwrap_err();
        assert_eq!(err.name(), "validation");
    }

    #[tokio::test]
    async fn test_register_with_validation_and_approval() {
        let store = Arc::new(MemoryStore::new());
        let registration = RegistrationConfig {
            admin_approval_required: true,
            validation: ValidationConfig {
                required: true,
                ..ValidationConfig::default()
            },
            ..RegistrationConfig::default()
        };
        let (service, mail) = service(store, registration);
        let user = service.register(request("jane")).await.unwrap();
        assert_eq!(user.state, State::Requested);
        let sent = mail.wait_for(1).await;
        assert!(matches!(&sent[0], SentEmail::Validation { to, .. } if to == "jane@example.com"));
    }

    #[tokio::test]
    async fn test_invitation_required() {
        let store = Arc::new(MemoryStore::new());
        let registration = RegistrationConfig {
            invitation: InvitationConfig {
                required: true,
                ..InvitationConfig::default()
            },
            ..RegistrationConfig::default()
        };
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_invitation(&Invitation::new(
                "jane@example.com".into(),
                hash_token("invite-token"),
                Utc::now() + Duration::days(1),
            ))
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        let (service, _) = service(store.clone(), registration);

        let err = service.register(request("jane")).await.unwrap_err();
        assert_eq!(err.name(), "invitation_token_invalid");

        let mut req = request("jane");
        req.invitation_token = Some("invite-token".into());
        service.register(req).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let invitation = tx.get_invitation("jane@example.com").await.unwrap().unwrap();
        assert_eq!(invitation.accepted_by.as_deref(), Some("jane"));
    }

    #[tokio::test]
    async fn test_state_is_admin_only() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store.clone(), RegistrationConfig::default());
        service.register(request("jane")).await.unwrap();
        let ctx = session_for(&store, "jane").await;
        let err = service
            .update(
                &ctx,
                "jane",
                UpdateUserRequest {
                    admin: Some(true),
                    ..UpdateUserRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "admin_only");
    }

    #[tokio::test]
    async fn test_changing_email_clears_validation() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store.clone(), RegistrationConfig::default());
        service.register(request("jane")).await.unwrap();
        {
            let mut tx = store.begin().await.unwrap();
            let mut user = tx.get_user("jane", false).await.unwrap().unwrap();
            user.primary_email_address_validated_at = Some(Utc::now());
            tx.update_user(&user).await.unwrap();
            tx.commit().await.unwrap();
        }
        let ctx = session_for(&store, "jane").await;
        let updated = service
            .update(
                &ctx,
                "jane",
                UpdateUserRequest {
                    primary_email_address: Some("jane@example.org".into()),
                    ..UpdateUserRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.primary_email_address_validated_at.is_none());
    }

    #[tokio::test]
    async fn test_update_password_revokes_sessions() {
        let store = Arc::new(MemoryStore::new());
        let (service, _) = service(store.clone(), RegistrationConfig::default());
        service.register(request("jane")).await.unwrap();

        let ctx = session_for(&store, "jane").await;
        let err = service
            .update_password(
                &ctx,
                "jane",
                UpdatePasswordRequest {
                    old: Some("Wrong-Password-1".into()),
                    new: "Battery-Staple-7".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "invalid_credentials");

        let (ctx, session_id) = session_with_id(&store, "jane").await;
        service
            .update_password(
                &ctx,
                "jane",
                UpdatePasswordRequest {
                    old: Some("Correct-Horse-9".into()),
                    new: "Battery-Staple-7".into(),
                },
            )
            .await
            .unwrap();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_session(&session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_temporary_password_once_per_hour() {
        let store = Arc::new(MemoryStore::new());
        let (service, mail) = service(store.clone(), RegistrationConfig::default());
        service.register(request("jane")).await.unwrap();

        service.create_temporary_password("jane").await.unwrap();
        let sent = mail.wait_for(1).await;
        let SentEmail::TemporaryPassword { password, .. } = &sent[0] else {
            panic!("expected a temporary password email");
        };
        let err = service.create_temporary_password("jane").await.unwrap_err();
        assert_eq!(err.name(), "temporary_password_still_valid");

        let mut tx = store.begin().await.unwrap();
        let user = tx.get_user("jane", false).await.unwrap().unwrap();
        drop(tx);
        assert_eq!(
            match_password(&user, password.clone()).await.unwrap(),
            Some(PasswordMatch::Temporary)
        );
    }
}
