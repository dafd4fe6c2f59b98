//! API keys: creation, use as a credential and guarded updates.

mod common;

use common::TestApp;
use identity_service::models::{EntityId, Right, Rights, State};
use serde_json::json;

/// `foo` owned by `u1`; `u2` may manage its API keys and read it.
async fn setup() -> (TestApp, String, String) {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    app.seed_user("u2", State::Approved, false).await;
    let foo = EntityId::application("foo");
    app.seed_entity(foo.clone(), &EntityId::user("u1"), Rights::from([Right::ApplicationAll]))
        .await;
    app.set_member(
        &EntityId::user("u2"),
        &foo,
        Rights::from([Right::ApplicationInfo, Right::ApplicationSettingsApiKeys]),
    )
    .await;
    let u1 = app.seed_session("u1").await;
    let u2 = app.seed_session("u2").await;
    (app, u1, u2)
}

#[tokio::test]
async fn test_entity_key_acts_within_its_scope() {
    let (app, u1, _) = setup().await;

    let created = app
        .post(
            "/v3/applications/foo/api_keys",
            Some(&u1),
            json!({ "name": "uplink", "rights": ["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_LINK"] }),
        )
        .await;
    assert_eq!(created.status, 201, "{}", created.body);
    let token = created.body["key"].as_str().unwrap().to_string();
    assert!(token.starts_with("AK."));
    assert!(created.body.get("key_hash").is_none());
    let key = format!("Bearer {}", token);

    let response = app.get("/v3/applications/foo/rights", Some(&key)).await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.body,
        json!(["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_LINK"])
    );

    let response = app.get("/v3/applications/foo", Some(&key)).await;
    assert_eq!(response.status, 200);

    let response = app.delete("/v3/applications/foo", Some(&key)).await;
    assert_eq!(response.status, 403);

    let response = app.get("/v3/applications/foo/api_keys", Some(&u1)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-total-count"), Some("1"));
    assert_eq!(response.body[0]["name"], "uplink");
}

#[tokio::test]
async fn test_key_rights_must_belong_to_the_entity_kind() {
    let (app, u1, _) = setup().await;

    let response = app
        .post(
            "/v3/applications/foo/api_keys",
            Some(&u1),
            json!({ "rights": ["RIGHT_GATEWAY_INFO"] }),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.name(), "invalid_rights");
}

#[tokio::test]
async fn test_caller_cannot_mint_rights_it_lacks() {
    let (app, _, u2) = setup().await;

    let response = app
        .post(
            "/v3/applications/foo/api_keys",
            Some(&u2),
            json!({ "rights": ["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_DELETE"] }),
        )
        .await;
    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "insufficient_rights");

    let response = app
        .post(
            "/v3/applications/foo/api_keys",
            Some(&u2),
            json!({ "rights": ["RIGHT_APPLICATION_INFO"] }),
        )
        .await;
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_key_updates_follow_the_rights_delta() {
    let (app, u1, u2) = setup().await;
    let created = app
        .post(
            "/v3/applications/foo/api_keys",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_LINK"] }),
        )
        .await;
    let key_id = created.body["id"].as_str().unwrap().to_string();
    let uri = format!("/v3/applications/foo/api_keys/{}", key_id);

    // u2 does not hold LINK and so cannot revoke it.
    let response = app
        .put(&uri, Some(&u2), json!({ "rights": ["RIGHT_APPLICATION_INFO"] }))
        .await;
    assert_eq!(response.status, 403);

    let response = app
        .put(&uri, Some(&u1), json!({ "name": "renamed", "rights": ["RIGHT_APPLICATION_INFO"] }))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["name"], "renamed");
    assert_eq!(response.body["rights"], json!(["RIGHT_APPLICATION_INFO"]));

    // Empty rights delete the key.
    let response = app.put(&uri, Some(&u2), json!({ "rights": [] })).await;
    assert_eq!(response.status, 204);
    let response = app.get(&uri, Some(&u1)).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.name(), "api_key_not_found");
}

#[tokio::test]
async fn test_keys_are_only_reachable_through_their_entity() {
    let (app, u1, _) = setup().await;
    app.seed_entity(
        EntityId::application("bar"),
        &EntityId::user("u1"),
        Rights::from([Right::ApplicationAll]),
    )
    .await;
    let created = app
        .post(
            "/v3/applications/foo/api_keys",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_INFO"] }),
        )
        .await;
    let key_id = created.body["id"].as_str().unwrap().to_string();

    let response = app
        .get(&format!("/v3/applications/bar/api_keys/{}", key_id), Some(&u1))
        .await;
    assert_eq!(response.status, 404);

    let response = app
        .get(&format!("/v3/applications/foo/api_keys/{}", key_id), Some(&u1))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["id"], key_id.as_str());
}

#[tokio::test]
async fn test_user_key_creates_applications_for_its_user() {
    let (app, u1, _) = setup().await;

    let created = app
        .post(
            "/v3/users/u1/api_keys",
            Some(&u1),
            json!({ "rights": ["RIGHT_USER_APPLICATIONS_CREATE", "RIGHT_APPLICATION_ALL"] }),
        )
        .await;
    assert_eq!(created.status, 201, "{}", created.body);
    let key = format!("Bearer {}", created.body["key"].as_str().unwrap());

    let response = app
        .post(
            "/v3/applications",
            Some(&key),
            json!({ "id": "from-key", "owner": { "kind": "user", "id": "u1" } }),
        )
        .await;
    assert_eq!(response.status, 201);
}
