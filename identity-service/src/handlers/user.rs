use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    dtos::{
        user::{CreateUserRequest, UpdatePasswordRequest, UpdateUserRequest},
        GetQuery,
    },
    handlers::masked,
    middleware::Caller,
    services::ServiceError,
    AppState,
};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = state.users.register(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(user_id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let user = state.users.get(&ctx, &user_id).await?;
    masked(&user, query.field_mask.as_deref())
}

pub async fn update_user(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.users.update(&ctx, &user_id, req).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.users.delete(&ctx, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_password(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(user_id): Path<String>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state.users.update_password(&ctx, &user_id, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Always answers 202 for unknown users so the endpoint does not reveal
/// which user IDs exist.
pub async fn create_temporary_password(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    match state.users.create_temporary_password(&user_id).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(ServiceError::NotFound { .. }) => {
            tracing::info!(user_id = %user_id, "Temporary password for unknown user");
            Ok(StatusCode::ACCEPTED)
        }
        Err(e) => Err(e),
    }
}
