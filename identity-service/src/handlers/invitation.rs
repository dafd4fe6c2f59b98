use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    dtos::{user::SendInvitationRequest, ListQuery},
    handlers::paged,
    middleware::Caller,
    services::ServiceError,
    AppState,
};

pub async fn send_invitation(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<SendInvitationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let invitation = state.invitations.send(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

pub async fn list_invitations(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state.invitations.list(&ctx, &query.pagination).await?;
    paged(page, query.field_mask.as_deref())
}

pub async fn delete_invitation(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.invitations.delete(&ctx, &email).await?;
    Ok(StatusCode::NO_CONTENT)
}
