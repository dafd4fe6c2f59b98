pub mod auth;
pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{deadline::deadline_middleware, tracing::request_id_middleware};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{Authorizer, MembershipRightsCache};
use crate::config::IdentityConfig;
use crate::models::EntityKind;
use crate::services::store::Store;
use crate::services::{
    AccessService, EmailQueue, InvitationService, MembershipCache, OAuthService, RegistryService,
    SessionService, UserService, ValidationService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdentityConfig>,
    pub store: Arc<dyn Store>,
    pub membership_cache: Option<Arc<dyn MembershipCache>>,
    pub authz: Authorizer,
    pub access: AccessService,
    pub registry: RegistryService,
    pub users: UserService,
    pub sessions: SessionService,
    pub oauth: OAuthService,
    pub invitations: InvitationService,
    pub validations: ValidationService,
}

impl AppState {
    /// Wires every service over one store. `membership_cache` enables the
    /// cross-request rights cache.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn Store>,
        membership_cache: Option<Arc<dyn MembershipCache>>,
        emails: EmailQueue,
    ) -> Self {
        let cache = membership_cache
            .clone()
            .map(|backend| MembershipRightsCache::new(backend, config.auth_cache.membership_ttl()));
        let authz = Authorizer::new(store.clone(), config.auth.clone(), cache);
        let registration = config.registration.clone();

        Self {
            access: AccessService::new(store.clone(), authz.clone()),
            registry: RegistryService::new(store.clone(), authz.clone(), config.user_rights.clone()),
            users: UserService::new(
                store.clone(),
                authz.clone(),
                emails.clone(),
                registration.clone(),
            ),
            sessions: SessionService::new(store.clone(), authz.clone(), config.session_ttl_seconds),
            oauth: OAuthService::new(
                store.clone(),
                authz.clone(),
                config.access_token_ttl_seconds,
            ),
            invitations: InvitationService::new(
                store.clone(),
                authz.clone(),
                emails.clone(),
                registration.invitation.clone(),
            ),
            validations: ValidationService::new(
                store.clone(),
                authz.clone(),
                emails,
                registration.validation.clone(),
            ),
            config: Arc::new(config),
            store,
            membership_cache,
            authz,
        }
    }
}

/// Registry routes of one entity kind, mounted at `/v3/<kind>s`.
fn registry_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(handlers::registry::create_entity).get(handlers::registry::list_entities),
        )
        .route(
            "/:id",
            get(handlers::registry::get_entity)
                .patch(handlers::registry::update_entity)
                .delete(handlers::registry::delete_entity),
        )
        .route("/:id/restore", post(handlers::registry::restore_entity))
        .route("/:id/purge", delete(handlers::registry::purge_entity))
}

/// Rights, API key and collaborator routes of one entity kind.
fn access_routes() -> Router<AppState> {
    Router::new()
        .route("/:id/rights", get(handlers::access::list_rights))
        .route(
            "/:id/api_keys",
            get(handlers::access::list_api_keys).post(handlers::access::create_api_key),
        )
        .route(
            "/:id/api_keys/:key_id",
            get(handlers::access::get_api_key)
                .put(handlers::access::update_api_key)
                .delete(handlers::access::delete_api_key),
        )
        .route("/:id/collaborators", get(handlers::access::list_collaborators))
        .route(
            "/:id/collaborators/:account_kind/:account_id",
            get(handlers::access::get_collaborator)
                .put(handlers::access::set_collaborator)
                .delete(handlers::access::delete_collaborator),
        )
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::user::register))
        .route(
            "/:id",
            get(handlers::user::get_user)
                .patch(handlers::user::update_user)
                .delete(handlers::user::delete_user),
        )
        .route("/:id/password", put(handlers::user::update_password))
        .route(
            "/:id/temporary_password",
            post(handlers::user::create_temporary_password),
        )
        .route(
            "/:id/authorizations/:client_id/tokens",
            get(handlers::oauth::list_tokens).post(handlers::oauth::issue_token),
        )
        .route(
            "/:id/authorizations/:client_id/tokens/:token_id",
            delete(handlers::oauth::delete_token),
        )
        .merge(access_routes())
        .layer(Extension(EntityKind::User))
}

/// Browsers may only call from the configured origins. `*` is rejected by
/// the production config.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|origin| {
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                    None
                }
            }
        }))
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-request-timeout"),
        ])
        .expose_headers([
            HeaderName::from_static(handlers::TOTAL_COUNT_HEADER),
            HeaderName::from_static(middleware::WARNING_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let mut v3 = Router::new()
        .route("/auth_info", get(handlers::auth::auth_info))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/contact_info/validation",
            post(handlers::validation::request_validation).patch(handlers::validation::validate),
        )
        .route(
            "/invitations",
            post(handlers::invitation::send_invitation).get(handlers::invitation::list_invitations),
        )
        .route(
            "/invitations/:email",
            delete(handlers::invitation::delete_invitation),
        )
        .nest("/users", user_routes());

    for kind in EntityKind::REGISTRY {
        v3 = v3.nest(
            &format!("/{}", kind.plural()),
            registry_routes()
                .merge(access_routes())
                .layer(Extension(kind)),
        );
    }

    Router::new()
        .route("/health", get(health_check))
        .nest("/v3", v3)
        .with_state(state.clone())
        .layer(from_fn(middleware::request_context_middleware))
        .layer(from_fn(deadline_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
}

/// Service health check. The store must be up; a failing membership cache
/// reports `degraded`.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        e
    })?;

    let cache = match &state.membership_cache {
        Some(cache) => match cache.health_check().await {
            Ok(()) => "up",
            Err(e) => {
                tracing::warn!(error = %e, "Membership cache health check failed");
                "down"
            }
        },
        None => "disabled",
    };

    Ok(Json(serde_json::json!({
        "status": if cache == "down" { "degraded" } else { "healthy" },
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "membership_cache": cache,
        }
    })))
}
