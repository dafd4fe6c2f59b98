use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use service_core::error::AppError;
use thiserror::Error;

use crate::models::{EntityKind, Rights};
use crate::services::policy::PolicyViolation;

/// Wire category of a domain error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    DeadlineExceeded,
    Internal,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Unauthenticated => "unauthenticated",
            Category::PermissionDenied => "permission_denied",
            Category::InvalidArgument => "invalid_argument",
            Category::NotFound => "not_found",
            Category::AlreadyExists => "already_exists",
            Category::FailedPrecondition => "failed_precondition",
            Category::DeadlineExceeded => "deadline_exceeded",
            Category::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Category::Unauthenticated => StatusCode::UNAUTHORIZED,
            Category::PermissionDenied => StatusCode::FORBIDDEN,
            Category::InvalidArgument => StatusCode::BAD_REQUEST,
            Category::NotFound => StatusCode::NOT_FOUND,
            Category::AlreadyExists => StatusCode::CONFLICT,
            Category::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Category::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Category::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    // Authentication
    #[error("No credentials supplied")]
    Unauthenticated,

    #[error("Unsupported authorization type or token kind")]
    UnsupportedAuthorization,

    #[error("Invalid authorization")]
    InvalidAuthorization,

    #[error("API key not found")]
    ApiKeyNotFound,

    #[error("API key expired")]
    ApiKeyExpired,

    #[error("Access token not found")]
    AccessTokenNotFound,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid credentials")]
    InvalidCredentials,

    // Authorization
    #[error("Insufficient rights, missing {missing}")]
    InsufficientRights { missing: Rights },

    #[error("Only admins may change `{field}`")]
    AdminOnly { field: &'static str },

    #[error("Client was rejected")]
    ClientRejected { description: String },

    #[error("Client was suspended")]
    ClientSuspended { description: String },

    #[error("Only admins may perform this operation")]
    AdminRequired,

    #[error("Client is not approved")]
    ClientNotApproved,

    #[error("Creating {kind}s is restricted to admins")]
    CreationRestricted { kind: EntityKind },

    // Invalid arguments
    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("ID `{id}` is not valid")]
    InvalidId { id: String },

    #[error("ID `{id}` is reserved")]
    ReservedId { id: String },

    #[error("Rights {rights} can not be assigned here")]
    InvalidRights { rights: Rights },

    #[error("A {account} can not be a member of a {entity}")]
    InvalidMembership { account: EntityKind, entity: EntityKind },

    #[error("Password rejected: {0}")]
    WeakPassword(#[from] PolicyViolation),

    #[error("Validation token mismatch")]
    ValidationTokenMismatch,

    #[error("Invitation token is not valid")]
    InvitationTokenInvalid,

    #[error("Request validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    // Not found
    #[error("{resource} `{id}` not found")]
    NotFound { resource: &'static str, id: String },

    // Conflicts
    #[error("{resource} `{id}` already exists")]
    AlreadyExists { resource: &'static str, id: String },

    #[error("A validation was requested recently, retry after {retry_interval}s")]
    ValidationRequestForbidden { retry_interval: u64 },

    #[error("An invitation was already sent to `{email}`")]
    InvitationAlreadySent { email: String },

    // Preconditions
    #[error("The {kind} must keep at least one collaborator with all rights")]
    NeedsCollaborator { kind: EntityKind },

    #[error("Validation expired")]
    ValidationExpired,

    #[error("Validation already used")]
    ValidationAlreadyUsed,

    #[error("No contact info needs validation")]
    NoContactInfoToValidate,

    #[error("A temporary password is still valid")]
    TemporaryPasswordStillValid,

    #[error("{kind} `{id}` is not deleted")]
    NotDeleted { kind: EntityKind, id: String },

    #[error("Invitation expired")]
    InvitationExpired,

    // Infrastructure
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Store error: {0}")]
    Store(#[from] AppError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn already_exists(resource: &'static str, id: impl Into<String>) -> Self {
        ServiceError::AlreadyExists {
            resource,
            id: id.into(),
        }
    }

    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        ServiceError::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Machine-readable kind of the error.
    pub fn name(&self) -> String {
        match self {
            ServiceError::Unauthenticated => "unauthenticated".into(),
            ServiceError::UnsupportedAuthorization => "unsupported_authorization".into(),
            ServiceError::InvalidAuthorization => "invalid_authorization".into(),
            ServiceError::ApiKeyNotFound => "api_key_not_found".into(),
            ServiceError::ApiKeyExpired => "api_key_expired".into(),
            ServiceError::AccessTokenNotFound => "access_token_not_found".into(),
            ServiceError::AccessTokenExpired => "access_token_expired".into(),
            ServiceError::SessionNotFound => "session_not_found".into(),
            ServiceError::SessionExpired => "session_expired".into(),
            ServiceError::InvalidCredentials => "invalid_credentials".into(),
            ServiceError::InsufficientRights { .. } => "insufficient_rights".into(),
            ServiceError::AdminOnly { .. } => "admin_only".into(),
            ServiceError::AdminRequired => "admin_required".into(),
            ServiceError::ClientNotApproved => "client_not_approved".into(),
            ServiceError::ClientRejected { .. } => "client_rejected".into(),
            ServiceError::ClientSuspended { .. } => "client_suspended".into(),
            ServiceError::CreationRestricted { kind } => format!("{}_creation_restricted", kind),
            ServiceError::InvalidArgument { .. } => "invalid_argument".into(),
            ServiceError::InvalidId { .. } => "invalid_id".into(),
            ServiceError::ReservedId { .. } => "reserved_id".into(),
            ServiceError::InvalidRights { .. } => "invalid_rights".into(),
            ServiceError::InvalidMembership { .. } => "invalid_membership".into(),
            ServiceError::WeakPassword(v) => v.name().into(),
            ServiceError::ValidationTokenMismatch => "validation_token_mismatch".into(),
            ServiceError::InvitationTokenInvalid => "invitation_token_invalid".into(),
            ServiceError::Validation(_) => "validation".into(),
            ServiceError::NotFound { resource, .. } => format!("{}_not_found", resource),
            ServiceError::AlreadyExists { resource, .. } => {
                format!("{}_already_exists", resource)
            }
            ServiceError::ValidationRequestForbidden { .. } => {
                "validation_request_forbidden".into()
            }
            ServiceError::InvitationAlreadySent { .. } => "invitation_already_sent".into(),
            ServiceError::NeedsCollaborator { kind } => format!("{}_needs_collaborator", kind),
            ServiceError::ValidationExpired => "validation_expired".into(),
            ServiceError::ValidationAlreadyUsed => "validation_already_used".into(),
            ServiceError::NoContactInfoToValidate => "no_contact_info_to_validate".into(),
            ServiceError::TemporaryPasswordStillValid => "temporary_password_still_valid".into(),
            ServiceError::NotDeleted { kind, .. } => format!("{}_not_deleted", kind),
            ServiceError::InvitationExpired => "invitation_expired".into(),
            ServiceError::DeadlineExceeded => "deadline_exceeded".into(),
            ServiceError::Store(e) => match e {
                AppError::NotFound(_) => "not_found".into(),
                AppError::Conflict(_) => "already_exists".into(),
                AppError::BadRequest(_) => "invalid_argument".into(),
                AppError::DeadlineExceeded => "deadline_exceeded".into(),
                _ => "internal".into(),
            },
            ServiceError::Internal(_) => "internal".into(),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            ServiceError::Unauthenticated
            | ServiceError::UnsupportedAuthorization
            | ServiceError::InvalidAuthorization
            | ServiceError::ApiKeyNotFound
            | ServiceError::ApiKeyExpired
            | ServiceError::AccessTokenNotFound
            | ServiceError::AccessTokenExpired
            | ServiceError::SessionNotFound
            | ServiceError::SessionExpired
            | ServiceError::InvalidCredentials => Category::Unauthenticated,

            ServiceError::InsufficientRights { .. }
            | ServiceError::AdminOnly { .. }
            | ServiceError::AdminRequired
            | ServiceError::ClientNotApproved
            | ServiceError::ClientRejected { .. }
            | ServiceError::ClientSuspended { .. }
            | ServiceError::CreationRestricted { .. } => Category::PermissionDenied,

            ServiceError::InvalidArgument { .. }
            | ServiceError::InvalidId { .. }
            | ServiceError::ReservedId { .. }
            | ServiceError::InvalidRights { .. }
            | ServiceError::InvalidMembership { .. }
            | ServiceError::WeakPassword(_)
            | ServiceError::ValidationTokenMismatch
            | ServiceError::InvitationTokenInvalid
            | ServiceError::Validation(_) => Category::InvalidArgument,

            ServiceError::NotFound { .. } => Category::NotFound,

            ServiceError::AlreadyExists { .. }
            | ServiceError::ValidationRequestForbidden { .. }
            | ServiceError::InvitationAlreadySent { .. } => Category::AlreadyExists,

            ServiceError::NeedsCollaborator { .. }
            | ServiceError::ValidationExpired
            | ServiceError::ValidationAlreadyUsed
            | ServiceError::NoContactInfoToValidate
            | ServiceError::TemporaryPasswordStillValid
            | ServiceError::NotDeleted { .. }
            | ServiceError::InvitationExpired => Category::FailedPrecondition,

            ServiceError::DeadlineExceeded => Category::DeadlineExceeded,

            ServiceError::Store(e) => match e {
                AppError::NotFound(_) => Category::NotFound,
                AppError::Conflict(_) => Category::AlreadyExists,
                AppError::BadRequest(_) => Category::InvalidArgument,
                AppError::DeadlineExceeded => Category::DeadlineExceeded,
                _ => Category::Internal,
            },
            ServiceError::Internal(_) => Category::Internal,
        }
    }

    /// Structured attributes attached to the error on the wire.
    pub fn attributes(&self) -> Map<String, Value> {
        let value = match self {
            ServiceError::InsufficientRights { missing } => json!({ "missing": missing }),
            ServiceError::AdminOnly { field } => json!({ "field": field }),
            ServiceError::ClientRejected { description }
            | ServiceError::ClientSuspended { description } => {
                json!({ "description": description })
            }
            ServiceError::InvalidArgument { field, .. } => json!({ "field": field }),
            ServiceError::InvalidId { id } | ServiceError::ReservedId { id } => {
                json!({ "id": id })
            }
            ServiceError::InvalidRights { rights } => json!({ "rights": rights }),
            ServiceError::InvalidMembership { account, entity } => {
                json!({ "account_kind": account, "entity_kind": entity })
            }
            ServiceError::WeakPassword(v) => json!({ "field": "password", "reason": v.to_string() }),
            ServiceError::NotFound { resource, id }
            | ServiceError::AlreadyExists { resource, id } => {
                json!({ "resource": resource, "id": id })
            }
            ServiceError::ValidationRequestForbidden { retry_interval } => {
                json!({ "retry_interval": retry_interval })
            }
            ServiceError::InvitationAlreadySent { email } => json!({ "email": email }),
            ServiceError::NeedsCollaborator { kind } => json!({ "entity_kind": kind }),
            ServiceError::NotDeleted { kind, id } => json!({ "entity_kind": kind, "id": id }),
            _ => Value::Null,
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Message safe to send to the caller. Internal causes stay in the logs.
    fn public_message(&self) -> String {
        match self.category() {
            Category::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = anyhow::anyhow!(err.to_string());
        match err {
            ServiceError::Store(e) => e,
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::Validation(e) => AppError::ValidationError(e),
            other => match other.category() {
                Category::Unauthenticated => AppError::Unauthorized(message),
                Category::PermissionDenied => AppError::Forbidden(message),
                Category::InvalidArgument => AppError::BadRequest(message),
                Category::NotFound => AppError::NotFound(message),
                Category::AlreadyExists => AppError::Conflict(message),
                Category::FailedPrecondition => AppError::FailedPrecondition(message),
                Category::DeadlineExceeded => AppError::DeadlineExceeded,
                Category::Internal => AppError::InternalError(message),
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            code: &'static str,
            name: String,
            message: String,
            #[serde(skip_serializing_if = "Map::is_empty")]
            attributes: Map<String, Value>,
        }

        let category = self.category();
        match category {
            Category::Internal => tracing::error!(error = %self, "Internal error"),
            Category::Unauthenticated => tracing::info!(error = %self, "Authentication failed"),
            _ => tracing::debug!(error = %self, name = %self.name(), "Request rejected"),
        }

        (
            category.status(),
            Json(ErrorResponse {
                code: category.as_str(),
                name: self.name(),
                message: self.public_message(),
                attributes: self.attributes(),
            }),
        )
            .into_response()
    }
}
