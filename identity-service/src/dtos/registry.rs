use serde::Deserialize;
use validator::Validate;

use crate::models::{ContactInfo, EntityId, Grant, Rights, State};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub eui: Option<String>,
    #[serde(default)]
    pub status_public: Option<bool>,
    #[serde(default)]
    pub location_public: Option<bool>,
}

/// OAuth client settings. `state`, `state_description`, `skip_authorization`
/// and `endorsed` are admin-only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub rights: Option<Rights>,
    #[serde(default)]
    pub grants: Option<Vec<Grant>>,
    #[serde(default)]
    pub state: Option<State>,
    #[serde(default)]
    pub state_description: Option<String>,
    #[serde(default)]
    pub skip_authorization: Option<bool>,
    #[serde(default)]
    pub endorsed: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateEntityRequest {
    pub id: String,
    /// Account that becomes the first collaborator.
    pub owner: EntityId,
    #[serde(default)]
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: String,
    #[serde(default)]
    pub contact_info: Vec<ContactInfo>,
    #[serde(default)]
    pub gateway: Option<GatewaySettings>,
    #[serde(default)]
    pub client: Option<ClientSettings>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateEntityRequest {
    #[serde(default)]
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    pub contact_info: Option<Vec<ContactInfo>>,
    #[serde(default)]
    pub gateway: Option<GatewaySettings>,
    #[serde(default)]
    pub client: Option<ClientSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEntitiesQuery {
    /// `user:<id>` or `organization:<id>`; defaults to the caller.
    #[serde(default)]
    pub collaborator: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub field_mask: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub order: Option<String>,
}
