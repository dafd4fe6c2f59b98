//! Authenticated principal of a single request.

use serde::Serialize;

use crate::models::{EntityId, Rights};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    #[default]
    Anonymous,
    ApiKey,
    AccessToken,
    SessionToken,
    Cluster,
}

/// Resolved credential. `rights` and `universal_rights` are closed under
/// implication.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthInfo {
    pub principal: Option<EntityId>,
    pub rights: Rights,
    pub universal_rights: Rights,
    pub access_method: AccessMethod,
    pub is_admin: bool,
    /// ID of the API key, session or access token used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AuthInfo {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn cluster() -> Self {
        Self {
            universal_rights: Rights::cluster().implied(),
            access_method: AccessMethod::Cluster,
            ..Self::default()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.access_method == AccessMethod::Anonymous
    }

    /// The user behind the credential, if any.
    pub fn user_id(&self) -> Option<&str> {
        match &self.principal {
            Some(EntityId::User(id)) => Some(id),
            _ => None,
        }
    }

    /// Restricts both rights sets to `allowed`.
    pub fn restrict(&mut self, allowed: &Rights) {
        self.rights = self.rights.intersect(allowed);
        self.universal_rights = self.universal_rights.intersect(allowed);
    }
}
