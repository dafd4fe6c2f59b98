//! OAuth access tokens issued to clients on behalf of users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rights::Rights;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    pub session_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_hash: String,
    pub rights: Rights,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
