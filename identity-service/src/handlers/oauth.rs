use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    dtos::{user::IssueTokenRequest, ListQuery},
    handlers::paged,
    middleware::Caller,
    services::ServiceError,
    AppState,
};

pub async fn issue_token(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((user_id, client_id)): Path<(String, String)>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let issued = state
        .oauth
        .issue_token(&ctx, &user_id, &client_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((user_id, client_id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .oauth
        .list_tokens(&ctx, &user_id, &client_id, &query.pagination)
        .await?;
    paged(page, query.field_mask.as_deref())
}

pub async fn delete_token(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((user_id, client_id, token_id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .oauth
        .delete_token(&ctx, &user_id, &client_id, &token_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
