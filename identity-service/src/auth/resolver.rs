//! Maps a presented credential to the [`AuthInfo`] of the request.

use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::auth::auth_info::{AccessMethod, AuthInfo};
use crate::auth::state::{apply_user_modifiers, check_client_state};
use crate::auth::token::{BearerToken, Credential, TokenKind};
use crate::config::AuthConfig;
use crate::models::{EntityId, Rights, User};
use crate::services::ServiceError;
use crate::services::store::{Store, StoreTx};
use crate::utils::verify_secret;

#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn Store>,
    config: AuthConfig,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn Store>, config: AuthConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Resolves the raw `Authorization` header. A missing header is anonymous.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<AuthInfo, ServiceError> {
        let Some(raw) = authorization.filter(|v| !v.trim().is_empty()) else {
            return Ok(AuthInfo::anonymous());
        };

        match Credential::from_header(raw)? {
            Credential::ClusterKey(key) => self.resolve_cluster(&key),
            Credential::Bearer(token) => {
                let mut tx = self.store.begin().await?;
                let result = match token.kind {
                    TokenKind::ApiKey => self.resolve_api_key(tx.as_mut(), &token).await,
                    TokenKind::AccessToken => self.resolve_access_token(tx.as_mut(), &token).await,
                    TokenKind::SessionToken => self.resolve_session(tx.as_mut(), &token).await,
                };
                if let Err(e) = &result {
                    tracing::info!(
                        kind = token.kind.prefix(),
                        credential_id = %token.id,
                        reason = %e.name(),
                        "Credential rejected"
                    );
                }
                result
            }
        }
    }

    fn resolve_cluster(&self, key: &str) -> Result<AuthInfo, ServiceError> {
        let known = self
            .config
            .cluster_keys
            .iter()
            .any(|k| bool::from(k.as_bytes().ct_eq(key.as_bytes())));
        if !known {
            tracing::warn!("Unknown cluster key presented");
            return Err(ServiceError::InvalidAuthorization);
        }
        Ok(AuthInfo::cluster())
    }

    async fn load_user(tx: &mut dyn StoreTx, user_id: &str) -> Result<User, ServiceError> {
        tx.get_user(user_id, false).await?.ok_or_else(|| {
            tracing::warn!(user_id, "Credential belongs to a missing or deleted user");
            ServiceError::InvalidAuthorization
        })
    }

    async fn resolve_api_key(
        &self,
        tx: &mut dyn StoreTx,
        token: &BearerToken,
    ) -> Result<AuthInfo, ServiceError> {
        let key = tx
            .get_api_key(&token.id)
            .await?
            .ok_or(ServiceError::ApiKeyNotFound)?;
        if !verify_secret(&token.secret, &key.key_hash) {
            return Err(ServiceError::InvalidAuthorization);
        }
        if key.is_expired(Utc::now()) {
            return Err(ServiceError::ApiKeyExpired);
        }

        let mut info = AuthInfo {
            principal: Some(key.entity.clone()),
            rights: key.rights.implied(),
            access_method: AccessMethod::ApiKey,
            credential_id: Some(key.id.clone()),
            ..AuthInfo::default()
        };
        if let EntityId::User(user_id) = &key.entity {
            let user = Self::load_user(tx, user_id).await?;
            apply_user_modifiers(&mut info, &user, &self.config);
        }
        Ok(info)
    }

    async fn resolve_access_token(
        &self,
        tx: &mut dyn StoreTx,
        token: &BearerToken,
    ) -> Result<AuthInfo, ServiceError> {
        let access = tx
            .get_access_token(&token.id)
            .await?
            .ok_or(ServiceError::AccessTokenNotFound)?;
        if !verify_secret(&token.secret, &access.access_hash) {
            return Err(ServiceError::InvalidAuthorization);
        }
        if access.is_expired(Utc::now()) {
            return Err(ServiceError::AccessTokenExpired);
        }

        let user = Self::load_user(tx, &access.user_id).await?;
        let client = tx
            .get_entity(&EntityId::client(access.client_id.as_str()), false)
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id = %access.client_id, "Access token of a missing client");
                ServiceError::InvalidAuthorization
            })?;
        check_client_state(&client)?;

        let mut info = AuthInfo {
            principal: Some(user.ids()),
            rights: access.rights.implied(),
            access_method: AccessMethod::AccessToken,
            credential_id: Some(access.id.clone()),
            ..AuthInfo::default()
        };
        apply_user_modifiers(&mut info, &user, &self.config);
        Ok(info)
    }

    async fn resolve_session(
        &self,
        tx: &mut dyn StoreTx,
        token: &BearerToken,
    ) -> Result<AuthInfo, ServiceError> {
        let session = tx
            .get_session(&token.id)
            .await?
            .ok_or(ServiceError::SessionNotFound)?;
        if !verify_secret(&token.secret, &session.secret_hash) {
            return Err(ServiceError::InvalidAuthorization);
        }
        if session.is_expired(Utc::now()) {
            return Err(ServiceError::SessionExpired);
        }

        let user = Self::load_user(tx, &session.user_id).await?;
        let mut info = AuthInfo {
            principal: Some(user.ids()),
            rights: Rights::all().implied(),
            access_method: AccessMethod::SessionToken,
            credential_id: Some(session.session_id.clone()),
            ..AuthInfo::default()
        };
        apply_user_modifiers(&mut info, &user, &self.config);
        Ok(info)
    }
}
