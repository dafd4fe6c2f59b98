//! Registration, sessions, passwords and profile management.

mod common;

use common::TestApp;
use identity_service::{models::State, services::SentEmail};
use serde_json::json;

const PASSWORD: &str = "Correct-Horse-9";

async fn register(app: &TestApp, user_id: &str) {
    let response = app
        .post(
            "/v3/users",
            None,
            json!({
                "user_id": user_id,
                "name": "Jane",
                "primary_email_address": format!("{}@example.com", user_id),
                "password": PASSWORD
            }),
        )
        .await;
    assert_eq!(response.status, 201, "{}", response.body);
}

async fn login(app: &TestApp, user_id: &str, password: &str) -> common::TestResponse {
    app.post(
        "/v3/auth/login",
        None,
        json!({ "user_id": user_id, "password": password }),
    )
    .await
}

fn bearer(response: &common::TestResponse) -> String {
    format!("Bearer {}", response.body["token"].as_str().unwrap())
}

#[tokio::test]
async fn test_register_login_and_logout() {
    let app = TestApp::spawn().await;
    register(&app, "jane").await;

    let response = login(&app, "jane", PASSWORD).await;
    assert_eq!(response.status, 201, "{}", response.body);
    assert!(response.body["token"].as_str().unwrap().starts_with("SK."));
    let session = bearer(&response);

    let response = app.get("/v3/auth_info", Some(&session)).await;
    assert_eq!(response.body["access_method"], "session_token");
    assert_eq!(response.body["principal"]["id"], "jane");

    let response = app
        .get("/v3/users/jane?field_mask=name", Some(&session))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["user_id"], "jane");
    assert_eq!(response.body["name"], "Jane");
    assert!(response.body.get("primary_email_address").is_none());

    let response = app
        .request(axum::http::Method::POST, "/v3/auth/logout", Some(&session), None)
        .await;
    assert_eq!(response.status, 204);

    let response = app.get("/v3/auth_info", Some(&session)).await;
    assert_eq!(response.status, 401);
    assert_eq!(response.name(), "session_not_found");
}

#[tokio::test]
async fn test_login_failures_look_the_same() {
    let app = TestApp::spawn().await;
    register(&app, "jane").await;

    let wrong_password = login(&app, "jane", "Wrong-Horse-9").await;
    let unknown_user = login(&app, "nobody", PASSWORD).await;

    assert_eq!(wrong_password.status, 401);
    assert_eq!(unknown_user.status, 401);
    assert_eq!(wrong_password.body, unknown_user.body);
    assert_eq!(wrong_password.name(), "invalid_credentials");
}

#[tokio::test]
async fn test_registration_rejects_weak_passwords_and_duplicates() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/v3/users",
            None,
            json!({
                "user_id": "jane",
                "primary_email_address": "jane@example.com",
                "password": "short"
            }),
        )
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["code"], "invalid_argument");

    register(&app, "jane").await;
    let response = app
        .post(
            "/v3/users",
            None,
            json!({
                "user_id": "jane",
                "primary_email_address": "other@example.com",
                "password": PASSWORD
            }),
        )
        .await;
    assert_eq!(response.status, 409);
    assert_eq!(response.name(), "user_already_exists");
}

#[tokio::test]
async fn test_temporary_password_forces_update() {
    let app = TestApp::spawn().await;
    register(&app, "jane").await;

    let response = app
        .request(axum::http::Method::POST, "/v3/users/jane/temporary_password", None, None)
        .await;
    assert_eq!(response.status, 202);
    let response = app
        .request(axum::http::Method::POST, "/v3/users/jane/temporary_password", None, None)
        .await;
    assert_eq!(response.status, 412);
    assert_eq!(response.name(), "temporary_password_still_valid");
    let response = app
        .request(axum::http::Method::POST, "/v3/users/nobody/temporary_password", None, None)
        .await;
    assert_eq!(response.status, 202);

    let sent = app.mailbox.wait_for(1).await;
    let temporary = match &sent[0] {
        SentEmail::TemporaryPassword { password, .. } => password.clone(),
        other => panic!("expected a temporary password email, got {:?}", other),
    };

    let response = login(&app, "jane", &temporary).await;
    assert_eq!(response.status, 201);
    assert_eq!(response.body["require_password_update"], true);
    let session = bearer(&response);

    // The temporary password is single use.
    let response = login(&app, "jane", &temporary).await;
    assert_eq!(response.status, 401);

    let response = app
        .put(
            "/v3/users/jane/password",
            Some(&session),
            json!({ "new": "Another-Horse-7" }),
        )
        .await;
    assert_eq!(response.status, 204, "{}", response.body);

    // Changing the password ends every session.
    let response = app.get("/v3/auth_info", Some(&session)).await;
    assert_eq!(response.status, 401);

    let response = login(&app, "jane", "Another-Horse-7").await;
    assert_eq!(response.status, 201);
    assert_eq!(response.body["require_password_update"], false);
}

#[tokio::test]
async fn test_password_update_requires_old_password() {
    let app = TestApp::spawn().await;
    register(&app, "jane").await;
    let session = bearer(&login(&app, "jane", PASSWORD).await);

    let response = app
        .put(
            "/v3/users/jane/password",
            Some(&session),
            json!({ "old": "Wrong-Horse-9", "new": "Another-Horse-7" }),
        )
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.name(), "invalid_credentials");

    let response = app
        .put(
            "/v3/users/jane/password",
            Some(&session),
            json!({ "old": PASSWORD, "new": "Another-Horse-7" }),
        )
        .await;
    assert_eq!(response.status, 204);
}

#[tokio::test]
async fn test_state_changes_are_admin_only() {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    app.seed_user("root-user", State::Approved, true).await;
    let u1 = app.seed_session("u1").await;
    let admin = app.seed_session("root-user").await;

    let response = app
        .patch("/v3/users/u1", Some(&u1), json!({ "state": "approved", "admin": true }))
        .await;
    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "admin_only");

    let response = app
        .patch(
            "/v3/users/u1",
            Some(&admin),
            json!({ "state": "suspended", "state_description": "abuse" }),
        )
        .await;
    assert_eq!(response.status, 200, "{}", response.body);
    assert_eq!(response.body["state"], "suspended");

    // Suspended users keep only USER_INFO and are told why.
    let response = app.get("/v3/auth_info", Some(&u1)).await;
    assert_eq!(response.body["rights"], json!(["RIGHT_USER_INFO"]));
    assert!(response
        .header("warning")
        .is_some_and(|w| w.contains("abuse")));
}

#[tokio::test]
async fn test_deleted_user_loses_sessions() {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    let u1 = app.seed_session("u1").await;

    let response = app.delete("/v3/users/u1", Some(&u1)).await;
    assert_eq!(response.status, 204);

    let response = app.get("/v3/auth_info", Some(&u1)).await;
    assert_eq!(response.status, 401);
    assert!(app.user("u1").await.deleted_at.is_some());
}

#[tokio::test]
async fn test_requested_users_are_restricted() {
    let mut config = common::test_config();
    config.registration.admin_approval_required = true;
    let app = TestApp::spawn_with(config).await;
    register(&app, "jane").await;
    let session = bearer(&login(&app, "jane", PASSWORD).await);

    let response = app
        .post(
            "/v3/applications",
            Some(&session),
            json!({ "id": "foo", "owner": { "kind": "user", "id": "jane" } }),
        )
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(app.user("jane").await.state, State::Requested);
}
