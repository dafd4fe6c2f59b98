//! Pagination and ordering of list results.

use serde::Deserialize;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
    /// Field to order by; a leading `-` orders descending.
    #[serde(default)]
    pub order: Option<String>,
}

impl Pagination {
    pub fn limit(&self) -> u32 {
        match self.limit {
            Some(0) | None => DEFAULT_LIMIT,
            Some(limit) => limit.min(MAX_LIMIT),
        }
    }

    /// One-based page number.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> u32 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    /// Slices an already ordered result set.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit() as usize)
            .collect()
    }

    pub fn descending(&self) -> bool {
        self.order.as_deref().is_some_and(|o| o.starts_with('-'))
    }
}

/// A page of results with the total count before pagination.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_offsets() {
        let p = Pagination::default();
        assert_eq!(p.limit(), DEFAULT_LIMIT);
        assert_eq!(p.offset(), 0);

        let p = Pagination {
            limit: Some(2),
            page: Some(2),
            order: Some("-created_at".into()),
        };
        assert_eq!(p.apply(vec![1, 2, 3, 4, 5]), vec![3, 4]);
        assert!(p.descending());
    }
}
