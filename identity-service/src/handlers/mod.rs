//! HTTP handlers over the domain services.

pub mod access;
pub mod auth;
pub mod invitation;
pub mod oauth;
pub mod registry;
pub mod user;
pub mod validation;

use axum::{
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::models::{EntityId, EntityKind, Page};
use crate::services::ServiceError;
use crate::utils::field_mask::FieldMask;

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// Serializes `value` and keeps only the fields named by `field_mask`.
pub(crate) fn masked<T: Serialize>(value: &T, field_mask: Option<&str>) -> Result<Json<Value>, ServiceError> {
    let value = serde_json::to_value(value).map_err(anyhow::Error::from)?;
    Ok(Json(FieldMask::parse(field_mask).apply(value)))
}

/// JSON array of the page items with the total in `x-total-count`.
pub(crate) fn paged<T: Serialize>(page: Page<T>, field_mask: Option<&str>) -> Result<Response, ServiceError> {
    let mask = FieldMask::parse(field_mask);
    let items = page
        .items
        .iter()
        .map(|item| serde_json::to_value(item).map(|v| mask.apply(v)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::from)?;
    let mut response = Json(items).into_response();
    response
        .headers_mut()
        .insert(TOTAL_COUNT_HEADER, HeaderValue::from(page.total));
    Ok(response)
}

pub(crate) fn entity_id(kind: EntityKind, id: String) -> Result<EntityId, ServiceError> {
    EntityId::new(kind, id)
        .ok_or_else(|| ServiceError::invalid_argument("kind", format!("{} has no flat ID", kind)))
}

/// Parses `user:<id>` / `organization:<id>` references and path segments.
pub(crate) fn account_id(kind: &str, id: &str) -> Result<EntityId, ServiceError> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: String| ServiceError::invalid_argument("account_kind", e))?;
    if !kind.is_account() {
        return Err(ServiceError::invalid_argument(
            "account_kind",
            format!("{} is not an account", kind),
        ));
    }
    entity_id(kind, id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id() {
        assert_eq!(account_id("users", "u1").unwrap(), EntityId::user("u1"));
        assert_eq!(
            account_id("organization", "o1").unwrap(),
            EntityId::organization("o1")
        );
        assert_eq!(
            account_id("gateway", "g1").unwrap_err().name(),
            "invalid_argument"
        );
    }
}
