//! Browser sessions of users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserSession {
    pub fn new(
        session_id: String,
        user_id: String,
        secret_hash: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            secret_hash,
            expires_at,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
