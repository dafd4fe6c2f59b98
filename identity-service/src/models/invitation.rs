//! Invitations to register on a server that requires them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub email: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn new(email: String, token_hash: String, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            email,
            token_hash,
            expires_at,
            created_at: now,
            updated_at: now,
            accepted_by: None,
            accepted_at: None,
        }
    }

    /// Unexpired and not yet accepted.
    pub fn is_outstanding(&self, now: DateTime<Utc>) -> bool {
        self.accepted_by.is_none() && self.expires_at > now
    }
}
