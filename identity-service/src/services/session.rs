use chrono::{Duration, Utc};
use std::sync::Arc;
use validator::Validate;

use crate::auth::{AccessMethod, Authorizer, BearerToken, RequestContext, TokenKind};
use crate::dtos::user::{LoginRequest, LoginResponse};
use crate::models::UserSession;
use crate::services::store::Store;
use crate::services::user::{match_password, PasswordMatch};
use crate::services::ServiceError;
use crate::utils::{generate_id, generate_secret, hash_secret};

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
    authz: Authorizer,
    session_ttl: Option<Duration>,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>, authz: Authorizer, session_ttl_seconds: Option<u64>) -> Self {
        Self {
            store,
            authz,
            session_ttl: session_ttl_seconds.map(|s| Duration::seconds(s as i64)),
        }
    }

    /// Exchanges user ID and password for a session token. A temporary
    /// password is accepted once and forces a password update.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, ServiceError> {
        req.validate()?;
        let user = {
            let mut tx = self.store.begin().await?;
            tx.get_user(&req.user_id, false).await?
        };
        let Some(user) = user else {
            tracing::info!(user_id = %req.user_id, "Login for unknown user");
            return Err(ServiceError::InvalidCredentials);
        };
        let Some(matched) = match_password(&user, req.password).await? else {
            tracing::info!(user_id = %user.user_id, "Login with wrong password");
            return Err(ServiceError::InvalidCredentials);
        };

        let now = Utc::now();
        let secret = generate_secret();
        let session = UserSession::new(
            generate_id(),
            user.user_id.clone(),
            hash_secret(&secret),
            self.session_ttl.map(|ttl| now + ttl),
        );

        let mut tx = self.store.begin().await?;
        let mut require_password_update = user.require_password_update;
        if matched == PasswordMatch::Temporary {
            let mut user = tx
                .get_user(&user.user_id, false)
                .await?
                .ok_or(ServiceError::InvalidCredentials)?;
            user.temporary_password_hash = None;
            user.temporary_password_expires_at = None;
            user.require_password_update = true;
            user.updated_at = now;
            tx.update_user(&user).await?;
            require_password_update = true;
        }
        tx.create_session(&session).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.user_id, session_id = %session.session_id, "Session created");
        Ok(LoginResponse {
            token: BearerToken::new(TokenKind::SessionToken, session.session_id.clone(), secret)
                .to_string(),
            session_id: session.session_id,
            expires_at: session.expires_at,
            require_password_update,
        })
    }

    /// Ends the session the request was made with.
    pub async fn logout(&self, ctx: &RequestContext) -> Result<(), ServiceError> {
        let info = self.authz.authenticated(ctx).await?;
        let session_id = match (info.access_method, info.credential_id) {
            (AccessMethod::SessionToken, Some(id)) => id,
            _ => {
                return Err(ServiceError::invalid_argument(
                    "authorization",
                    "logout requires a session token",
                ))
            }
        };
        let mut tx = self.store.begin().await?;
        tx.delete_session(&session_id).await?;
        tx.commit().await?;
        tracing::info!(session_id = %session_id, "Session ended");
        Ok(())
    }
}
