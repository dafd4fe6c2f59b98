pub mod access;
pub mod registry;
pub mod user;

use serde::Deserialize;

use crate::models::Pagination;

/// Query of list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(flatten)]
    pub pagination: Pagination,
    #[serde(default)]
    pub field_mask: Option<String>,
}

/// Query of get endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct GetQuery {
    #[serde(default)]
    pub field_mask: Option<String>,
}
