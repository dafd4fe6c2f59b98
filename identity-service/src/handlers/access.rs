//! Rights, API key and collaborator endpoints, mounted under every entity
//! kind including users.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};

use crate::{
    dtos::{
        access::{CreateApiKeyRequest, SetCollaboratorRequest, UpdateApiKeyRequest},
        GetQuery, ListQuery,
    },
    handlers::{account_id, entity_id, masked, paged},
    middleware::Caller,
    models::EntityKind,
    services::ServiceError,
    AppState,
};

pub async fn list_rights(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let rights = state.access.list_rights(&ctx, &entity_id(kind, id)?).await?;
    Ok(Json(rights))
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state
        .access
        .create_api_key(&ctx, &entity_id(kind, id)?, req)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .access
        .list_api_keys(&ctx, &entity_id(kind, id)?, &query.pagination)
        .await?;
    paged(page, query.field_mask.as_deref())
}

pub async fn get_api_key(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path((id, key_id)): Path<(String, String)>,
    Query(query): Query<GetQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let key = state
        .access
        .get_api_key(&ctx, &entity_id(kind, id)?, &key_id)
        .await?;
    masked(&key, query.field_mask.as_deref())
}

/// Updating a key to empty rights deletes it and answers 204.
pub async fn update_api_key(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path((id, key_id)): Path<(String, String)>,
    Json(req): Json<UpdateApiKeyRequest>,
) -> Result<Response, ServiceError> {
    let updated = state
        .access
        .update_api_key(&ctx, &entity_id(kind, id)?, &key_id, req)
        .await?;
    Ok(match updated {
        Some(key) => Json(key).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn delete_api_key(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path((id, key_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .access
        .delete_api_key(&ctx, &entity_id(kind, id)?, &key_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_collaborators(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .access
        .list_collaborators(&ctx, &entity_id(kind, id)?, &query.pagination)
        .await?;
    paged(page, query.field_mask.as_deref())
}

pub async fn get_collaborator(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path((id, account_kind, account)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let collaborator = state
        .access
        .get_collaborator(&ctx, &entity_id(kind, id)?, &account_id(&account_kind, &account)?)
        .await?;
    Ok(Json(collaborator))
}

pub async fn set_collaborator(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path((id, account_kind, account)): Path<(String, String, String)>,
    Json(req): Json<SetCollaboratorRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .access
        .set_collaborator(
            &ctx,
            &entity_id(kind, id)?,
            &account_id(&account_kind, &account)?,
            req.rights,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_collaborator(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path((id, account_kind, account)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .access
        .delete_collaborator(&ctx, &entity_id(kind, id)?, &account_id(&account_kind, &account)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
