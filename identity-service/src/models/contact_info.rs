//! Contact information attached to users and registry entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    #[default]
    Other,
    Abuse,
    Billing,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    #[default]
    Other,
    Email,
    Phone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub contact_type: ContactType,
    #[serde(default)]
    pub contact_method: ContactMethod,
    pub value: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
}

impl ContactInfo {
    pub fn email(value: impl Into<String>) -> Self {
        Self {
            contact_type: ContactType::Other,
            contact_method: ContactMethod::Email,
            value: value.into(),
            public: false,
            validated_at: None,
        }
    }

    /// Email entries without a validation timestamp.
    pub fn needs_validation(&self) -> bool {
        self.contact_method == ContactMethod::Email && self.validated_at.is_none()
    }
}

/// Replaces `old` with `new`. Validation timestamps are never taken from the
/// caller; they carry over only for entries whose method and value are unchanged.
pub fn carry_validation(old: &[ContactInfo], new: Vec<ContactInfo>) -> Vec<ContactInfo> {
    new.into_iter()
        .map(|mut info| {
            info.validated_at = old
                .iter()
                .find(|o| o.contact_method == info.contact_method && o.value == info.value)
                .and_then(|o| o.validated_at);
            info
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_carries_over_unchanged_entries_only() {
        let at = Utc::now();
        let mut kept = ContactInfo::email("ops@example.com");
        kept.validated_at = Some(at);
        let mut forged = ContactInfo::email("new@example.com");
        forged.validated_at = Some(at);

        let merged = carry_validation(
            &[kept.clone()],
            vec![ContactInfo::email("ops@example.com"), forged],
        );
        assert_eq!(merged[0].validated_at, Some(at));
        assert!(merged[1].validated_at.is_none());
    }
}
