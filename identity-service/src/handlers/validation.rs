use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use validator::Validate;

use crate::{
    dtos::user::{RequestValidationRequest, ValidateRequest},
    middleware::Caller,
    services::ServiceError,
    AppState,
};

pub async fn request_validation(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<RequestValidationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let validations = state
        .validations
        .request_validation(&ctx, &req.entity)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(validations)))
}

pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    state.validations.validate(&req.id, &req.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
