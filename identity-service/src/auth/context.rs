//! Per-request memoization of the caller's auth info and rights.

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::auth::auth_info::AuthInfo;
use crate::models::{EntityId, Rights};

/// Lives for one request. The first resolution of the credential and of the
/// rights on each target is kept; later lookups reuse it.
#[derive(Debug, Default)]
pub struct RequestContext {
    authorization: Option<String>,
    pub(crate) auth_info: OnceCell<AuthInfo>,
    pub(crate) rights: DashMap<EntityId, Rights>,
}

impl RequestContext {
    pub fn new(authorization: Option<String>) -> Self {
        Self {
            authorization,
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Raw `Authorization` header value.
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Auth info, if already resolved in this request.
    pub fn resolved(&self) -> Option<&AuthInfo> {
        self.auth_info.get()
    }

    /// Warnings attached to the resolved credential.
    pub fn warnings(&self) -> Vec<String> {
        self.auth_info
            .get()
            .map(|info| info.warnings.clone())
            .unwrap_or_default()
    }

    /// Drops memoized rights, e.g. after the caller changed its own memberships.
    pub fn forget_rights(&self) {
        self.rights.clear();
    }
}
