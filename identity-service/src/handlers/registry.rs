//! Registry endpoints shared by applications, clients, gateways and
//! organizations. The entity kind is attached to each nested router as an
//! extension.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use crate::{
    dtos::{
        registry::{CreateEntityRequest, ListEntitiesQuery, UpdateEntityRequest},
        GetQuery,
    },
    handlers::{account_id, entity_id, masked, paged},
    middleware::Caller,
    models::{EntityKind, Pagination},
    services::ServiceError,
    AppState,
};

pub async fn create_entity(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Json(req): Json<CreateEntityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let entity = state.registry.create(&ctx, kind, req).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn list_entities(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Query(query): Query<ListEntitiesQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let collaborator = match query.collaborator.as_deref() {
        Some(raw) => {
            let (account_kind, id) = raw.split_once(':').ok_or_else(|| {
                ServiceError::invalid_argument("collaborator", "expected `<kind>:<id>`")
            })?;
            Some(account_id(account_kind, id)?)
        }
        None => None,
    };
    let pagination = Pagination {
        limit: query.limit,
        page: query.page,
        order: query.order,
    };
    let page = state
        .registry
        .list(&ctx, kind, collaborator, query.include_deleted, &pagination)
        .await?;
    paged(page, query.field_mask.as_deref())
}

pub async fn get_entity(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let entity = state.registry.get(&ctx, &entity_id(kind, id)?).await?;
    masked(&entity, query.field_mask.as_deref())
}

pub async fn update_entity(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let entity = state.registry.update(&ctx, &entity_id(kind, id)?, req).await?;
    Ok(Json(entity))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.registry.delete(&ctx, &entity_id(kind, id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore_entity(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let entity = state.registry.restore(&ctx, &entity_id(kind, id)?).await?;
    Ok(Json(entity))
}

pub async fn purge_entity(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.registry.purge(&ctx, &entity_id(kind, id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
