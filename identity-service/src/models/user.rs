//! User accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::contact_info::ContactInfo;
use super::entity::{EntityId, State};

/// User entity as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub primary_email_address: String,
    pub primary_email_address_validated_at: Option<DateTime<Utc>>,
    pub password_hash: String,
    pub password_updated_at: DateTime<Utc>,
    pub require_password_update: bool,
    pub temporary_password_hash: Option<String>,
    pub temporary_password_expires_at: Option<DateTime<Utc>>,
    pub state: State,
    pub state_description: String,
    pub admin: bool,
    pub contact_info: Vec<ContactInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        user_id: String,
        name: String,
        primary_email_address: String,
        password_hash: String,
        state: State,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            name,
            description: String::new(),
            primary_email_address,
            primary_email_address_validated_at: None,
            password_hash,
            password_updated_at: now,
            require_password_update: false,
            temporary_password_hash: None,
            temporary_password_expires_at: None,
            state,
            state_description: String::new(),
            admin: false,
            contact_info: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn ids(&self) -> EntityId {
        EntityId::User(self.user_id.clone())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Email addresses of this user still awaiting validation.
    pub fn unvalidated_addresses(&self) -> Vec<String> {
        let mut addresses = Vec::new();
        if self.primary_email_address_validated_at.is_none() {
            addresses.push(self.primary_email_address.clone());
        }
        for info in self.contact_info.iter().filter(|c| c.needs_validation()) {
            if !addresses.contains(&info.value) {
                addresses.push(info.value.clone());
            }
        }
        addresses
    }

    /// Marks `address` validated on the primary email and matching contact rows.
    pub fn mark_validated(&mut self, address: &str, at: DateTime<Utc>) {
        if self.primary_email_address == address {
            self.primary_email_address_validated_at = Some(at);
        }
        for info in self.contact_info.iter_mut() {
            if info.value == address && info.needs_validation() {
                info.validated_at = Some(at);
            }
        }
    }

    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser::from(self.clone())
    }
}

/// User without secrets, safe to return to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedUser {
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub primary_email_address: String,
    pub primary_email_address_validated_at: Option<DateTime<Utc>>,
    pub password_updated_at: DateTime<Utc>,
    pub require_password_update: bool,
    pub state: State,
    pub state_description: String,
    pub admin: bool,
    pub contact_info: Vec<ContactInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<User> for SanitizedUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            name: user.name,
            description: user.description,
            primary_email_address: user.primary_email_address,
            primary_email_address_validated_at: user.primary_email_address_validated_at,
            password_updated_at: user.password_updated_at,
            require_password_update: user.require_password_update,
            state: user.state,
            state_description: user.state_description,
            admin: user.admin,
            contact_info: user.contact_info,
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: user.deleted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unvalidated_addresses_deduplicates_primary() {
        let mut user = User::new(
            "u1".into(),
            "U1".into(),
            "u1@example.com".into(),
            "hash".into(),
            State::Approved,
        );
        user.contact_info.push(ContactInfo::email("u1@example.com"));
        user.contact_info.push(ContactInfo::email("ops@example.com"));
        assert_eq!(
            user.unvalidated_addresses(),
            vec!["u1@example.com".to_string(), "ops@example.com".to_string()]
        );

        let now = Utc::now();
        user.mark_validated("u1@example.com", now);
        assert_eq!(user.primary_email_address_validated_at, Some(now));
        assert_eq!(user.unvalidated_addresses(), vec!["ops@example.com".to_string()]);
    }
}
