//! Authorization core: credentials, rights resolution and the mutation guard.

pub mod auth_info;
pub mod cache;
pub mod context;
pub mod guard;
pub mod resolver;
pub mod rights;
pub mod state;
pub mod token;

use std::sync::Arc;

pub use auth_info::{AccessMethod, AuthInfo};
pub use cache::MembershipRightsCache;
pub use context::RequestContext;
pub use guard::{RightsDelta, check_delta, ensure_collaborator_remains, ensure_key_avenue_remains};
pub use resolver::CredentialResolver;
pub use rights::{require, resolve_rights};
pub use token::{BearerToken, Credential, TokenKind};

use crate::config::AuthConfig;
use crate::models::{EntityId, Right, Rights};
use crate::services::ServiceError;
use crate::services::store::{Store, StoreTx};

/// Entry point used by the services: memoizes per request, consults the
/// membership cache on reads and bypasses it inside write transactions.
#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn Store>,
    resolver: CredentialResolver,
    cache: Option<MembershipRightsCache>,
}

impl Authorizer {
    pub fn new(
        store: Arc<dyn Store>,
        config: AuthConfig,
        cache: Option<MembershipRightsCache>,
    ) -> Self {
        Self {
            resolver: CredentialResolver::new(store.clone(), config),
            store,
            cache,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        self.resolver.config()
    }

    /// The caller's auth info, resolved at most once per request.
    pub async fn auth_info(&self, ctx: &RequestContext) -> Result<AuthInfo, ServiceError> {
        let info = ctx
            .auth_info
            .get_or_try_init(|| self.resolver.resolve(ctx.authorization()))
            .await?;
        Ok(info.clone())
    }

    /// Like [`Authorizer::auth_info`], but anonymous callers are rejected.
    pub async fn authenticated(&self, ctx: &RequestContext) -> Result<AuthInfo, ServiceError> {
        let info = self.auth_info(ctx).await?;
        if info.is_anonymous() {
            return Err(ServiceError::Unauthenticated);
        }
        Ok(info)
    }

    /// Rights of the caller on `target`, memoized for the request.
    pub async fn rights_on(&self, ctx: &RequestContext, target: &EntityId) -> Result<Rights, ServiceError> {
        if let Some(rights) = ctx.rights.get(target) {
            return Ok(rights.clone());
        }
        let info = self.auth_info(ctx).await?;
        let mut tx = self.store.begin().await?;
        let rights = resolve_rights(tx.as_mut(), self.cache.as_ref(), &info, target).await?;
        drop(tx);
        ctx.rights.insert(target.clone(), rights.clone());
        Ok(rights)
    }

    /// Fails unless the caller holds every right of `required` on `target`.
    pub async fn require(
        &self,
        ctx: &RequestContext,
        target: &EntityId,
        required: &[Right],
    ) -> Result<Rights, ServiceError> {
        let info = self.auth_info(ctx).await?;
        if info.is_anonymous() {
            return Err(ServiceError::Unauthenticated);
        }
        let held = self.rights_on(ctx, target).await?;
        require(&held, &required.iter().copied().collect())?;
        Ok(held)
    }

    /// Fails unless the caller holds `right` regardless of the target.
    pub async fn require_universal(
        &self,
        ctx: &RequestContext,
        right: Right,
    ) -> Result<AuthInfo, ServiceError> {
        let info = self.authenticated(ctx).await?;
        require(&info.universal_rights, &Rights::from([right]))?;
        Ok(info)
    }

    /// Rights of `info` on `target` read inside an open write transaction.
    pub async fn rights_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        info: &AuthInfo,
        target: &EntityId,
    ) -> Result<Rights, ServiceError> {
        resolve_rights(tx, None, info, target).await
    }

    /// Drops cached memberships of the given accounts.
    pub async fn invalidate(&self, accounts: &[EntityId]) {
        if let Some(cache) = &self.cache {
            for account in accounts {
                cache.invalidate(account).await;
            }
        }
    }
}
