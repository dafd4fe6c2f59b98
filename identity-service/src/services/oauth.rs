//! Access tokens issued to OAuth clients on behalf of users. The
//! authorization-code flow is handled elsewhere; this registry only issues,
//! lists and revokes tokens.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::auth::state::check_client_state;
use crate::auth::{AccessMethod, Authorizer, BearerToken, RequestContext, TokenKind};
use crate::dtos::user::{IssueTokenRequest, IssueTokenResponse};
use crate::models::{AccessToken, Entity, EntityDetails, EntityId, Page, Pagination, Right, Rights, State};
use crate::services::store::Store;
use crate::services::ServiceError;
use crate::utils::{generate_id, generate_secret, hash_secret};

#[derive(Clone)]
pub struct OAuthService {
    store: Arc<dyn Store>,
    authz: Authorizer,
    token_ttl: Duration,
}

impl OAuthService {
    pub fn new(store: Arc<dyn Store>, authz: Authorizer, access_token_ttl_seconds: u64) -> Self {
        Self {
            store,
            authz,
            token_ttl: Duration::seconds(access_token_ttl_seconds as i64),
        }
    }

    /// Issues a token for `client` acting as `user_id`. The token carries the
    /// requested rights restricted to what the client may ask for and what
    /// the caller holds on the user.
    pub async fn issue_token(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        client_id: &str,
        req: IssueTokenRequest,
    ) -> Result<IssueTokenResponse, ServiceError> {
        let user = EntityId::user(user_id);
        let held = self
            .authz
            .require(ctx, &user, &[Right::UserAuthorizedClients])
            .await?;
        let info = self.authz.auth_info(ctx).await?;

        let client = self.load_client(client_id).await?;
        check_client_state(&client)?;
        if matches!(client.client_state(), Some((State::Requested, _)))
            && self.authz.rights_on(ctx, &client.ids).await?.is_empty()
        {
            tracing::info!(client_id, user_id, "Token for a client that is not approved");
            return Err(ServiceError::ClientNotApproved);
        }

        let rights = req
            .rights
            .implied()
            .intersect(&client_rights(&client).implied())
            .intersect(&held);
        if rights.is_empty() {
            return Err(ServiceError::invalid_argument(
                "rights",
                "none of the requested rights can be granted to this client",
            ));
        }

        let now = Utc::now();
        let secret = generate_secret();
        let token = AccessToken {
            id: generate_id(),
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            session_id: match info.access_method {
                AccessMethod::SessionToken => info.credential_id.clone(),
                _ => None,
            },
            access_hash: hash_secret(&secret),
            rights,
            expires_at: now + self.token_ttl,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.create_access_token(&token).await?;
        tx.commit().await?;

        tracing::info!(user_id, client_id, token_id = %token.id, "Access token issued");
        Ok(IssueTokenResponse {
            token: BearerToken::new(TokenKind::AccessToken, token.id.clone(), secret).to_string(),
            access_token: token,
        })
    }

    pub async fn list_tokens(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        client_id: &str,
        pagination: &Pagination,
    ) -> Result<Page<AccessToken>, ServiceError> {
        self.authz
            .require(ctx, &EntityId::user(user_id), &[Right::UserAuthorizedClients])
            .await?;

        let mut tx = self.store.begin().await?;
        let mut tokens = tx.find_access_tokens(user_id, client_id).await?;
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if pagination.descending() {
            tokens.reverse();
        }
        let total = tokens.len() as u64;
        Ok(Page {
            items: pagination.apply(tokens),
            total,
        })
    }

    pub async fn delete_token(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        client_id: &str,
        token_id: &str,
    ) -> Result<(), ServiceError> {
        self.authz
            .require(ctx, &EntityId::user(user_id), &[Right::UserAuthorizedClients])
            .await?;

        let mut tx = self.store.begin().await?;
        match tx.get_access_token(token_id).await? {
            Some(token) if token.user_id == user_id && token.client_id == client_id => {}
            _ => return Err(ServiceError::not_found("access_token", token_id)),
        }
        tx.delete_access_token(token_id).await?;
        tx.commit().await?;
        tracing::info!(user_id, client_id, token_id, "Access token deleted");
        Ok(())
    }

    async fn load_client(&self, client_id: &str) -> Result<Entity, ServiceError> {
        let mut tx = self.store.begin().await?;
        tx.get_entity(&EntityId::client(client_id), false)
            .await?
            .ok_or_else(|| ServiceError::not_found("client", client_id))
    }
}

fn client_rights(client: &Entity) -> Rights {
    match &client.details {
        EntityDetails::Client { rights, .. } => rights.clone(),
        _ => Rights::new(),
    }
}
