//! Cross-request cache of the rights an account holds on entities.
//!
//! One entry per (account, entity kind) holds a JSON map from entity ID to
//! the effective membership rights. Entries are filled lazily and deleted
//! whenever a membership of the account changes. The cache is advisory:
//! read and write failures are logged and treated as misses.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{EntityId, EntityKind, Rights};
use crate::services::redis::MembershipCache;

#[derive(Clone)]
pub struct MembershipRightsCache {
    backend: Arc<dyn MembershipCache>,
    ttl: Duration,
}

impl MembershipRightsCache {
    pub fn new(backend: Arc<dyn MembershipCache>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn key(account: &EntityId, kind: EntityKind) -> String {
        format!("membership:{}:{}", account, kind)
    }

    async fn load(&self, key: &str) -> Option<BTreeMap<String, Rights>> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    tracing::warn!(error = %e, key, "Discarding undecodable membership cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, key, "Membership cache read failed");
                None
            }
        }
    }

    /// Cached rights of `account` on `entity`.
    pub async fn get(&self, account: &EntityId, entity: &EntityId) -> Option<Rights> {
        let map = self.load(&Self::key(account, entity.kind())).await?;
        map.get(entity.id()).cloned()
    }

    /// Best-effort insert into the account's entry.
    pub async fn put(&self, account: &EntityId, entity: &EntityId, rights: &Rights) {
        let key = Self::key(account, entity.kind());
        let mut map = self.load(&key).await.unwrap_or_default();
        map.insert(entity.id().to_string(), rights.clone());
        let raw = match serde_json::to_string(&map) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, key, "Failed to encode membership cache entry");
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, &raw, self.ttl.as_secs()).await {
            tracing::warn!(error = %e, key, "Membership cache write failed");
        }
    }

    /// Drops every entry of `account`.
    pub async fn invalidate(&self, account: &EntityId) {
        for kind in EntityKind::REGISTRY {
            let key = Self::key(account, kind);
            if let Err(e) = self.backend.delete(&key).await {
                tracing::warn!(error = %e, key, "Membership cache invalidation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Right;
    use crate::services::redis::MockMembershipCache;

    fn cache(backend: Arc<MockMembershipCache>) -> MembershipRightsCache {
        MembershipRightsCache::new(backend, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let backend = Arc::new(MockMembershipCache::new());
        let cache = cache(backend.clone());
        let user = EntityId::user("u1");
        let app = EntityId::application("foo");
        let rights = Rights::from([Right::ApplicationInfo]);

        assert_eq!(cache.get(&user, &app).await, None);
        cache.put(&user, &app, &rights).await;
        cache.put(&user, &EntityId::application("bar"), &Rights::new()).await;
        assert_eq!(cache.get(&user, &app).await, Some(rights));
        assert!(backend.contains("membership:user:u1:application"));

        cache.invalidate(&user).await;
        assert_eq!(cache.get(&user, &app).await, None);
    }

    #[tokio::test]
    async fn test_backend_failures_are_misses() {
        let backend = Arc::new(MockMembershipCache::new());
        let cache = cache(backend.clone());
        let user = EntityId::user("u1");
        let app = EntityId::application("foo");
        cache.put(&user, &app, &Rights::from([Right::ApplicationInfo])).await;

        backend.set_failing(true);
        assert_eq!(cache.get(&user, &app).await, None);
        cache.put(&user, &app, &Rights::new()).await;
        cache.invalidate(&user).await;
    }
}
