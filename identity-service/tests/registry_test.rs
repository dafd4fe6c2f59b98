//! Registry lifecycle of applications, clients, gateways and organizations.

mod common;

use common::TestApp;
use identity_service::models::{EntityId, Right, Rights, State};
use serde_json::json;

async fn app_with_owner() -> (TestApp, String) {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    let session = app.seed_session("u1").await;
    (app, session)
}

#[tokio::test]
async fn test_create_then_get_round_trips() {
    let (app, u1) = app_with_owner().await;

    let created = app
        .post(
            "/v3/gateways",
            Some(&u1),
            json!({
                "id": "gw-1",
                "owner": { "kind": "user", "id": "u1" },
                "name": "Rooftop",
                "description": "North side",
                "gateway": { "eui": "0102030405060708", "status_public": true }
            }),
        )
        .await;
    assert_eq!(created.status, 201, "{}", created.body);

    let fetched = app.get("/v3/gateways/gw-1", Some(&u1)).await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.body, created.body);
    assert_eq!(fetched.body["name"], "Rooftop");
    assert_eq!(fetched.body["details"]["status_public"], true);
}

#[tokio::test]
async fn test_field_mask_selects_fields() {
    let (app, u1) = app_with_owner().await;
    app.post(
        "/v3/applications",
        Some(&u1),
        json!({ "id": "foo", "owner": { "kind": "user", "id": "u1" }, "name": "Foo", "description": "Bar" }),
    )
    .await;

    let response = app
        .get("/v3/applications/foo?field_mask=name,unknown.field", Some(&u1))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body["name"], "Foo");
    assert_eq!(response.body["ids"]["id"], "foo");
    assert!(response.body.get("description").is_none());
    assert!(response.body.get("unknown").is_none());
}

#[tokio::test]
async fn test_duplicate_and_invalid_ids_are_rejected() {
    let (app, u1) = app_with_owner().await;
    let create = |id: &'static str| {
        json!({ "id": id, "owner": { "kind": "user", "id": "u1" } })
    };

    let response = app.post("/v3/applications", Some(&u1), create("foo")).await;
    assert_eq!(response.status, 201);

    let response = app.post("/v3/applications", Some(&u1), create("foo")).await;
    assert_eq!(response.status, 409);
    assert_eq!(response.name(), "application_already_exists");

    let response = app.post("/v3/applications", Some(&u1), create("Not_Valid")).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.name(), "invalid_id");

    let response = app.post("/v3/applications", Some(&u1), create("admin")).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.name(), "reserved_id");
}

#[tokio::test]
async fn test_list_is_paginated_with_total_count() {
    let (app, u1) = app_with_owner().await;
    for id in ["app-a", "app-b", "app-c"] {
        let response = app
            .post(
                "/v3/applications",
                Some(&u1),
                json!({ "id": id, "owner": { "kind": "user", "id": "u1" } }),
            )
            .await;
        assert_eq!(response.status, 201);
    }

    let first = app.get("/v3/applications?limit=2&page=1", Some(&u1)).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-total-count"), Some("3"));
    assert_eq!(first.body.as_array().map(Vec::len), Some(2));

    let second = app.get("/v3/applications?limit=2&page=2", Some(&u1)).await;
    assert_eq!(second.header("x-total-count"), Some("3"));
    assert_eq!(second.body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_update_requires_settings_basic() {
    let (app, u1) = app_with_owner().await;
    app.seed_user("u2", State::Approved, false).await;
    let foo = EntityId::application("foo");
    app.seed_entity(foo.clone(), &EntityId::user("u1"), Rights::from([Right::ApplicationAll]))
        .await;
    app.set_member(&EntityId::user("u2"), &foo, Rights::from([Right::ApplicationInfo]))
        .await;
    let u2 = app.seed_session("u2").await;

    let response = app
        .patch("/v3/applications/foo", Some(&u2), json!({ "name": "Hijacked" }))
        .await;
    assert_eq!(response.status, 403);

    let response = app
        .patch("/v3/applications/foo", Some(&u1), json!({ "name": "Renamed" }))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["name"], "Renamed");
}

#[tokio::test]
async fn test_delete_restore_and_purge() {
    let (app, u1) = app_with_owner().await;
    app.seed_user("root-user", State::Approved, true).await;
    let admin = app.seed_session("root-user").await;
    let foo = EntityId::application("foo");
    app.seed_entity(foo.clone(), &EntityId::user("u1"), Rights::from([Right::ApplicationAll]))
        .await;

    let response = app.delete("/v3/applications/foo", Some(&u1)).await;
    assert_eq!(response.status, 204);
    let response = app.get("/v3/applications/foo", Some(&u1)).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.name(), "application_not_found");

    let response = app
        .request(axum::http::Method::POST, "/v3/applications/foo/restore", Some(&u1), None)
        .await;
    assert_eq!(response.status, 200);
    let response = app
        .request(axum::http::Method::POST, "/v3/applications/foo/restore", Some(&u1), None)
        .await;
    assert_eq!(response.status, 412);
    assert_eq!(response.name(), "application_not_deleted");

    let response = app.delete("/v3/applications/foo/purge", Some(&u1)).await;
    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "admin_required");

    let response = app.delete("/v3/applications/foo/purge", Some(&admin)).await;
    assert_eq!(response.status, 204);
    assert!(app.member_rights(&EntityId::user("u1"), &foo).await.is_none());
}

#[tokio::test]
async fn test_client_state_is_admin_only() {
    let (app, u1) = app_with_owner().await;

    let response = app
        .post(
            "/v3/clients",
            Some(&u1),
            json!({
                "id": "console",
                "owner": { "kind": "user", "id": "u1" },
                "client": { "state": "approved" }
            }),
        )
        .await;
    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "admin_only");

    let response = app
        .post(
            "/v3/clients",
            Some(&u1),
            json!({
                "id": "console",
                "owner": { "kind": "user", "id": "u1" },
                "client": { "rights": ["RIGHT_USER_INFO"] }
            }),
        )
        .await;
    assert_eq!(response.status, 201, "{}", response.body);
    assert_eq!(response.body["details"]["state"], "requested");
}

#[tokio::test]
async fn test_creation_can_be_restricted_to_admins() {
    let mut config = common::test_config();
    config.user_rights.create_gateways = false;
    let app = TestApp::spawn_with(config).await;
    app.seed_user("u1", State::Approved, false).await;
    let u1 = app.seed_session("u1").await;

    let response = app
        .post(
            "/v3/gateways",
            Some(&u1),
            json!({ "id": "gw-1", "owner": { "kind": "user", "id": "u1" } }),
        )
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "gateway_creation_restricted");
}
