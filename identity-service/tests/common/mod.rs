#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use identity_service::{
    auth::{BearerToken, TokenKind},
    build_router,
    config::IdentityConfig,
    models::{ApiKey, Entity, EntityId, Rights, State, User, UserSession},
    services::{
        store::{MemoryStore, Store, StoreTx},
        EmailQueue, MembershipCache, MockEmailService, MockMembershipCache,
    },
    utils::{generate_secret, hash_secret},
    AppState,
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const CLUSTER_KEY: &str = "cluster-test-key";

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// Machine-readable error name of an error response.
    pub fn name(&self) -> &str {
        self.body["name"].as_str().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MockMembershipCache>,
    pub mailbox: MockEmailService,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    pub async fn spawn_with(config: IdentityConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MockMembershipCache::new());
        let mailbox = MockEmailService::new();
        let (emails, _worker) =
            EmailQueue::start(Arc::new(mailbox.clone()), 64, config.base_url.clone());

        let state = AppState::new(
            config,
            store.clone(),
            Some(cache.clone() as Arc<dyn MembershipCache>),
            emails,
        );

        Self {
            router: build_router(state),
            store,
            cache,
            mailbox,
        }
    }

    // ==================== Seeding ====================

    pub async fn seed_user(&self, user_id: &str, state: State, admin: bool) -> User {
        let mut user = User::new(
            user_id.to_string(),
            user_id.to_uppercase(),
            format!("{}@example.com", user_id),
            "unused".to_string(),
            state,
        );
        user.admin = admin;
        user.primary_email_address_validated_at = Some(Utc::now());

        let mut tx = self.store.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.commit().await.unwrap();
        user
    }

    /// Stores an API key for `entity` and returns its `Authorization` value.
    pub async fn seed_api_key(
        &self,
        entity: EntityId,
        rights: Rights,
        expires_at: Option<DateTime<Utc>>,
    ) -> String {
        let id = format!("K{}", &generate_secret()[..10]).to_uppercase();
        let secret = generate_secret();
        let key = ApiKey::new(
            id.clone(),
            hash_secret(&secret),
            entity,
            "seeded".to_string(),
            rights,
            expires_at,
        );

        let mut tx = self.store.begin().await.unwrap();
        tx.create_api_key(&key).await.unwrap();
        tx.commit().await.unwrap();
        bearer(TokenKind::ApiKey, &id, &secret)
    }

    /// Stores a session of `user_id` and returns its `Authorization` value.
    pub async fn seed_session(&self, user_id: &str) -> String {
        let id = format!("S{}", &generate_secret()[..10]).to_uppercase();
        let secret = generate_secret();
        let session = UserSession::new(id.clone(), user_id.to_string(), hash_secret(&secret), None);

        let mut tx = self.store.begin().await.unwrap();
        tx.create_session(&session).await.unwrap();
        tx.commit().await.unwrap();
        bearer(TokenKind::SessionToken, &id, &secret)
    }

    /// Creates an entity owned by `owner` directly in the store.
    pub async fn seed_entity(&self, ids: EntityId, owner: &EntityId, rights: Rights) -> Entity {
        let entity = Entity::new(ids.clone(), ids.id().to_string(), String::new()).unwrap();

        let mut tx = self.store.begin().await.unwrap();
        tx.create_entity(&entity).await.unwrap();
        tx.set_member(owner, &ids, &rights.implied()).await.unwrap();
        tx.commit().await.unwrap();
        entity
    }

    pub async fn set_member(&self, account: &EntityId, entity: &EntityId, rights: Rights) {
        let mut tx = self.store.begin().await.unwrap();
        tx.set_member(account, entity, &rights.implied()).await.unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn member_rights(&self, account: &EntityId, entity: &EntityId) -> Option<Rights> {
        let mut tx = self.store.begin().await.unwrap();
        tx.get_member(account, entity).await.unwrap()
    }

    pub async fn user(&self, user_id: &str) -> User {
        let mut tx = self.store.begin().await.unwrap();
        tx.get_user(user_id, true).await.unwrap().unwrap()
    }

    // ==================== Requests ====================

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        authorization: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(authorization) = authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, authorization: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, authorization, None).await
    }

    pub async fn post(&self, uri: &str, authorization: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, authorization, Some(body)).await
    }

    pub async fn put(&self, uri: &str, authorization: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::PUT, uri, authorization, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, authorization: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::PATCH, uri, authorization, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, authorization: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, uri, authorization, None).await
    }
}

/// Development config with a cluster key and no registration hurdles.
pub fn test_config() -> IdentityConfig {
    let mut config = IdentityConfig::default();
    config.auth.cluster_keys = vec![CLUSTER_KEY.to_string()];
    config
}

pub fn bearer(kind: TokenKind, id: &str, secret: &str) -> String {
    format!("Bearer {}", BearerToken::new(kind, id, secret))
}

pub fn cluster_auth() -> String {
    format!("ClusterKey {}", CLUSTER_KEY)
}
