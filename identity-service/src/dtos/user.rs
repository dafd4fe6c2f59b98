use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{AccessToken, ContactInfo, EntityId, Rights, State};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    pub user_id: String,
    #[serde(default)]
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub primary_email_address: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[serde(default)]
    pub invitation_token: Option<String>,
}

/// `state`, `state_description` and `admin` are admin-only.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[serde(default)]
    #[validate(length(max = 50, message = "Name must be at most 50 characters"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(email(message = "Invalid email format"))]
    pub primary_email_address: Option<String>,
    #[serde(default)]
    pub contact_info: Option<Vec<ContactInfo>>,
    #[serde(default)]
    pub state: Option<State>,
    #[serde(default)]
    pub state_description: Option<String>,
    #[serde(default)]
    pub admin: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePasswordRequest {
    /// Current or temporary password; admins may omit it.
    #[serde(default)]
    pub old: Option<String>,
    #[validate(length(min = 1, message = "Password is required"))]
    pub new: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub require_password_update: bool,
}

#[derive(Debug, Deserialize)]
pub struct RequestValidationRequest {
    pub entity: EntityId,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateRequest {
    #[validate(length(min = 1, message = "Reference is required"))]
    pub id: String,
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendInvitationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub rights: Rights,
}

/// A new access token; `token` is only ever returned here.
#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    #[serde(flatten)]
    pub access_token: AccessToken,
    pub token: String,
}
