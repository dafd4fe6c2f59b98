//! Membership changes: ownership on create, the rights-delta guard and the
//! last-owner rule.

mod common;

use common::{cluster_auth, TestApp};
use identity_service::models::{EntityId, EntityKind, Right, Rights, State};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn right_set(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn names(rights: &Rights) -> BTreeSet<String> {
    rights.to_strings().into_iter().collect()
}

/// Application `foo` owned by `u1`, with sessions for `u1`, `u2` and `u3`.
async fn app_with_foo() -> (TestApp, String, String) {
    let app = TestApp::spawn().await;
    for user in ["u1", "u2", "u3"] {
        app.seed_user(user, State::Approved, false).await;
    }
    app.seed_entity(
        EntityId::application("foo"),
        &EntityId::user("u1"),
        Rights::from([Right::ApplicationAll]),
    )
    .await;
    let u1 = app.seed_session("u1").await;
    let u2 = app.seed_session("u2").await;
    (app, u1, u2)
}

#[tokio::test]
async fn test_owner_creates_application() {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    let key = app
        .seed_api_key(
            EntityId::user("u1"),
            Rights::from([
                Right::UserApplicationsCreate,
                Right::UserApplicationsList,
                Right::ApplicationAll,
            ]),
            None,
        )
        .await;

    let response = app
        .post(
            "/v3/applications",
            Some(&key),
            json!({ "id": "foo", "owner": { "kind": "user", "id": "u1" }, "name": "Foo" }),
        )
        .await;
    assert_eq!(response.status, 201, "{}", response.body);
    assert_eq!(response.body["ids"]["id"], "foo");

    let owner_rights = app
        .member_rights(&EntityId::user("u1"), &EntityId::application("foo"))
        .await
        .unwrap();
    assert_eq!(owner_rights, Rights::from([Right::ApplicationAll]).implied());

    let response = app
        .get("/v3/applications/foo/collaborators", Some(&key))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-total-count"), Some("1"));
    assert_eq!(response.body[0]["ids"]["id"], "u1");

    let response = app
        .get("/v3/applications?collaborator=user:u1", Some(&key))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-total-count"), Some("1"));
    assert_eq!(response.body[0]["ids"]["id"], "foo");
}

#[tokio::test]
async fn test_creation_requires_create_right_on_owner() {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    let key = app
        .seed_api_key(EntityId::user("u1"), Rights::from([Right::UserInfo]), None)
        .await;

    let response = app
        .post(
            "/v3/gateways",
            Some(&key),
            json!({ "id": "gw-1", "owner": { "kind": "user", "id": "u1" } }),
        )
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "insufficient_rights");
}

#[tokio::test]
async fn test_collaborator_cannot_grant_rights_it_lacks() {
    let (app, u1, u2) = app_with_foo().await;

    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u2",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_SETTINGS_COLLABORATORS"] }),
        )
        .await;
    assert_eq!(response.status, 204, "{}", response.body);

    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u3",
            Some(&u2),
            json!({ "rights": [
                "RIGHT_APPLICATION_INFO",
                "RIGHT_APPLICATION_SETTINGS_COLLABORATORS",
                "RIGHT_APPLICATION_DELETE"
            ] }),
        )
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(response.body["code"], "permission_denied");
    assert!(app
        .member_rights(&EntityId::user("u3"), &EntityId::application("foo"))
        .await
        .is_none());
}

#[tokio::test]
async fn test_revoking_requires_held_rights_unless_removing_entirely() {
    let (app, u1, u2) = app_with_foo().await;
    let foo = EntityId::application("foo");
    app.set_member(
        &EntityId::user("u2"),
        &foo,
        Rights::from([
            Right::ApplicationInfo,
            Right::ApplicationLink,
            Right::ApplicationSettingsCollaborators,
        ]),
    )
    .await;
    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u3",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_LINK", "RIGHT_APPLICATION_DELETE"] }),
        )
        .await;
    assert_eq!(response.status, 204);

    // Narrowing u3 to INFO would revoke DELETE, which u2 does not hold.
    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u3",
            Some(&u2),
            json!({ "rights": ["RIGHT_APPLICATION_INFO"] }),
        )
        .await;
    assert_eq!(response.status, 403);
    assert_eq!(response.name(), "insufficient_rights");

    // Removing the membership altogether is allowed.
    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u3",
            Some(&u2),
            json!({ "rights": [] }),
        )
        .await;
    assert_eq!(response.status, 204);
    assert!(app
        .member_rights(&EntityId::user("u3"), &foo)
        .await
        .is_none());
}

#[tokio::test]
async fn test_set_then_get_returns_implied_rights() {
    let (app, u1, _) = app_with_foo().await;

    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u2",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_ALL"] }),
        )
        .await;
    assert_eq!(response.status, 204);

    let response = app
        .get("/v3/applications/foo/collaborators/user/u2", Some(&u1))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(
        right_set(&response.body["rights"]),
        names(&Rights::from([Right::ApplicationAll]).implied())
    );

    let response = app
        .delete("/v3/applications/foo/collaborators/user/u2", Some(&u1))
        .await;
    assert_eq!(response.status, 204);

    let response = app
        .get("/v3/applications/foo/collaborators/user/u2", Some(&u1))
        .await;
    assert_eq!(response.status, 404);
    assert_eq!(response.name(), "collaborator_not_found");
}

#[tokio::test]
async fn test_sole_owner_cannot_leave() {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    let gateway = EntityId::gateway("g");
    app.seed_entity(
        gateway.clone(),
        &EntityId::user("u1"),
        Rights::from([Right::GatewayAll]),
    )
    .await;
    let u1 = app.seed_session("u1").await;

    let response = app
        .delete("/v3/gateways/g/collaborators/user/u1", Some(&u1))
        .await;

    assert_eq!(response.status, 412);
    assert_eq!(response.body["code"], "failed_precondition");
    assert_eq!(response.name(), "gateway_needs_collaborator");
    assert_eq!(
        app.member_rights(&EntityId::user("u1"), &gateway).await,
        Some(Rights::from([Right::GatewayAll]).implied())
    );
}

#[tokio::test]
async fn test_owner_may_leave_once_another_owner_exists() {
    let (app, u1, _) = app_with_foo().await;

    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u2",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_ALL"] }),
        )
        .await;
    assert_eq!(response.status, 204);

    let response = app
        .delete("/v3/applications/foo/collaborators/user/u1", Some(&u1))
        .await;
    assert_eq!(response.status, 204);
    assert!(app
        .member_rights(&EntityId::user("u1"), &EntityId::application("foo"))
        .await
        .is_none());
}

#[tokio::test]
async fn test_organization_membership_confers_intersected_rights() {
    let app = TestApp::spawn().await;
    app.seed_user("u1", State::Approved, false).await;
    app.seed_user("u2", State::Approved, false).await;
    let org = EntityId::organization("acme");
    let foo = EntityId::application("foo");
    app.seed_entity(org.clone(), &EntityId::user("u2"), Rights::from([Right::OrganizationAll]))
        .await;
    app.set_member(
        &EntityId::user("u1"),
        &org,
        Rights::from([Right::OrganizationInfo, Right::ApplicationInfo, Right::ApplicationLink]),
    )
    .await;
    app.seed_entity(foo.clone(), &org, Rights::from([Right::ApplicationAll]))
        .await;
    let u1 = app.seed_session("u1").await;

    let response = app.get("/v3/applications/foo/rights", Some(&u1)).await;
    assert_eq!(response.status, 200);
    assert_eq!(
        right_set(&response.body),
        names(&Rights::from([Right::ApplicationInfo, Right::ApplicationLink]))
    );

    let response = app.get("/v3/applications", Some(&u1)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-total-count"), Some("1"));
}

#[tokio::test]
async fn test_membership_changes_invalidate_cached_rights() {
    let (app, u1, u2) = app_with_foo().await;
    app.set_member(
        &EntityId::user("u2"),
        &EntityId::application("foo"),
        Rights::from([Right::ApplicationInfo]),
    )
    .await;

    let response = app.get("/v3/applications/foo/rights", Some(&u2)).await;
    assert_eq!(right_set(&response.body), names(&Rights::from([Right::ApplicationInfo])));
    assert!(app.cache.contains("membership:user:u2:application"));

    let response = app
        .put(
            "/v3/applications/foo/collaborators/user/u2",
            Some(&u1),
            json!({ "rights": ["RIGHT_APPLICATION_INFO", "RIGHT_APPLICATION_LINK"] }),
        )
        .await;
    assert_eq!(response.status, 204);
    assert!(!app.cache.contains("membership:user:u2:application"));

    let response = app.get("/v3/applications/foo/rights", Some(&u2)).await;
    assert_eq!(
        right_set(&response.body),
        names(&Rights::from([Right::ApplicationInfo, Right::ApplicationLink]))
    );
}

#[tokio::test]
async fn test_unavailable_cache_falls_through_to_store() {
    let (app, _, u2) = app_with_foo().await;
    app.set_member(
        &EntityId::user("u2"),
        &EntityId::application("foo"),
        Rights::from([Right::ApplicationInfo]),
    )
    .await;
    app.cache.set_failing(true);

    let response = app.get("/v3/applications/foo/rights", Some(&u2)).await;

    assert_eq!(response.status, 200);
    assert_eq!(right_set(&response.body), names(&Rights::from([Right::ApplicationInfo])));
}

#[tokio::test]
async fn test_cluster_caller_sees_cluster_rights_on_any_application() {
    let (app, _, _) = app_with_foo().await;

    let response = app
        .get("/v3/applications/foo/rights", Some(&cluster_auth()))
        .await;

    assert_eq!(response.status, 200);
    let expected = Rights::cluster()
        .implied()
        .intersect(&Rights::family(EntityKind::Application));
    assert_eq!(right_set(&response.body), names(&expected));
}

#[tokio::test]
async fn test_users_have_no_collaborators() {
    let (app, u1, _) = app_with_foo().await;

    let response = app
        .put(
            "/v3/users/u1/collaborators/user/u2",
            Some(&u1),
            json!({ "rights": ["RIGHT_USER_INFO"] }),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.name(), "invalid_membership");
}
