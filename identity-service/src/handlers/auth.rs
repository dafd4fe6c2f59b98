use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{dtos::user::LoginRequest, middleware::Caller, services::ServiceError, AppState};

/// Resolved credential of the caller; anonymous callers get an empty one.
pub async fn auth_info(
    State(state): State<AppState>,
    Caller(ctx): Caller,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.authz.auth_info(&ctx).await?))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.sessions.login(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn logout(
    State(state): State<AppState>,
    Caller(ctx): Caller,
) -> Result<impl IntoResponse, ServiceError> {
    state.sessions.logout(&ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}
