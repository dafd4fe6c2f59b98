use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{ApiKey, EntityId, Rights};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: String,
    pub rights: Rights,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A new API key; `key` is only ever returned here.
#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateApiKeyRequest {
    #[serde(default)]
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: Option<String>,
    /// Empty rights delete the key.
    #[serde(default)]
    pub rights: Option<Rights>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SetCollaboratorRequest {
    pub rights: Rights,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collaborator {
    pub ids: EntityId,
    pub rights: Rights,
}
