//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::types::Json;
use sqlx::{FromRow, Transaction};
use std::collections::BTreeMap;

use super::{Store, StoreTx, illegal_membership, missing};
use crate::models::{
    AccessToken, ApiKey, ContactInfo, EmailValidation, EndDeviceId, Entity, EntityDetails,
    EntityId, EntityKind, Invitation, MembershipChain, Page, Pagination, Rights, User,
    UserSession,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ==================== Row mapping ====================

fn entity_ref(kind: &str, id: &str) -> Result<EntityId, AppError> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: String| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    match kind {
        EntityKind::EndDevice => {
            let (application_id, device_id) = id.split_once('.').ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("malformed end device reference `{}`", id))
            })?;
            Ok(EntityId::EndDevice(EndDeviceId {
                application_id: application_id.to_string(),
                device_id: device_id.to_string(),
            }))
        }
        other => EntityId::new(other, id)
            .ok_or_else(|| AppError::DatabaseError(anyhow::anyhow!("bad entity kind"))),
    }
}

/// Column values (`entity_kind`, `entity_id`) of an entity reference.
fn columns(ids: &EntityId) -> (&'static str, String) {
    match ids {
        EntityId::EndDevice(dev) => (
            EntityKind::EndDevice.as_str(),
            format!("{}.{}", dev.application_id, dev.device_id),
        ),
        other => (other.kind().as_str(), other.id().to_string()),
    }
}

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    name: String,
    description: String,
    primary_email_address: String,
    primary_email_address_validated_at: Option<DateTime<Utc>>,
    password_hash: String,
    password_updated_at: DateTime<Utc>,
    require_password_update: bool,
    temporary_password_hash: Option<String>,
    temporary_password_expires_at: Option<DateTime<Utc>>,
    state: String,
    state_description: String,
    admin: bool,
    contact_info: Json<Vec<ContactInfo>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            primary_email_address: row.primary_email_address,
            primary_email_address_validated_at: row.primary_email_address_validated_at,
            password_hash: row.password_hash,
            password_updated_at: row.password_updated_at,
            require_password_update: row.require_password_update,
            temporary_password_hash: row.temporary_password_hash,
            temporary_password_expires_at: row.temporary_password_expires_at,
            state: row
                .state
                .parse()
                .map_err(|e: String| AppError::DatabaseError(anyhow::anyhow!(e)))?,
            state_description: row.state_description,
            admin: row.admin,
            contact_info: row.contact_info.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct EntityRow {
    entity_kind: String,
    entity_id: String,
    name: String,
    description: String,
    contact_info: Json<Vec<ContactInfo>>,
    details: Json<EntityDetails>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<EntityRow> for Entity {
    type Error = AppError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        Ok(Entity {
            ids: entity_ref(&row.entity_kind, &row.entity_id)?,
            name: row.name,
            description: row.description,
            contact_info: row.contact_info.0,
            details: row.details.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct ApiKeyRow {
    key_id: String,
    key_hash: String,
    entity_kind: String,
    entity_id: String,
    name: String,
    rights: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = AppError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        Ok(ApiKey {
            id: row.key_id,
            key_hash: row.key_hash,
            entity: entity_ref(&row.entity_kind, &row.entity_id)?,
            name: row.name,
            rights: Rights::from_strings(&row.rights),
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    user_id: String,
    secret_hash: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for UserSession {
    fn from(row: SessionRow) -> Self {
        UserSession {
            session_id: row.session_id,
            user_id: row.user_id,
            secret_hash: row.secret_hash,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct AccessTokenRow {
    token_id: String,
    user_id: String,
    client_id: String,
    session_id: Option<String>,
    access_hash: String,
    rights: Vec<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<AccessTokenRow> for AccessToken {
    fn from(row: AccessTokenRow) -> Self {
        AccessToken {
            id: row.token_id,
            user_id: row.user_id,
            client_id: row.client_id,
            session_id: row.session_id,
            access_hash: row.access_hash,
            rights: Rights::from_strings(&row.rights),
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ValidationRow {
    validation_id: String,
    token_hash: String,
    address: String,
    entity_kind: String,
    entity_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
}

impl TryFrom<ValidationRow> for EmailValidation {
    type Error = AppError;

    fn try_from(row: ValidationRow) -> Result<Self, Self::Error> {
        Ok(EmailValidation {
            id: row.validation_id,
            token_hash: row.token_hash,
            address: row.address,
            entity: entity_ref(&row.entity_kind, &row.entity_id)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            used_at: row.used_at,
        })
    }
}

#[derive(FromRow)]
struct InvitationRow {
    email: String,
    token_hash: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    accepted_by: Option<String>,
    accepted_at: Option<DateTime<Utc>>,
}

impl From<InvitationRow> for Invitation {
    fn from(row: InvitationRow) -> Self {
        Invitation {
            email: row.email,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            accepted_by: row.accepted_by,
            accepted_at: row.accepted_at,
        }
    }
}

#[derive(FromRow)]
struct ChainRow {
    organization_id: Option<String>,
    organization_rights: Option<Vec<String>>,
    entity_id: String,
    rights: Vec<String>,
}

fn order_clause(pagination: &Pagination, allowed: &[&str], default: &str) -> String {
    let field = pagination
        .order
        .as_deref()
        .map(|o| o.trim_start_matches('-'))
        .filter(|f| allowed.contains(f))
        .unwrap_or(default);
    let direction = if pagination.descending() { "DESC" } else { "ASC" };
    format!("ORDER BY {} {}", field, direction)
}

const USER_COLUMNS: &str = "user_id, name, description, primary_email_address, \
    primary_email_address_validated_at, password_hash, password_updated_at, \
    require_password_update, temporary_password_hash, temporary_password_expires_at, state, \
    state_description, admin, contact_info, created_at, updated_at, deleted_at";

const ENTITY_COLUMNS: &str = "entity_kind, entity_id, name, description, contact_info, details, \
    created_at, updated_at, deleted_at";

const API_KEY_COLUMNS: &str =
    "key_id, key_hash, entity_kind, entity_id, name, rights, expires_at, created_at, updated_at";

const VALIDATION_COLUMNS: &str = "validation_id, token_hash, address, entity_kind, entity_id, \
    created_at, updated_at, expires_at, used_at";

const INVITATION_COLUMNS: &str =
    "email, token_hash, expires_at, created_at, updated_at, accepted_by, accepted_at";

#[async_trait]
impl StoreTx for PgTx {
    // ==================== Memberships ====================

    async fn get_member(
        &mut self,
        account: &EntityId,
        entity: &EntityId,
    ) -> Result<Option<Rights>, AppError> {
        let (account_kind, account_id) = columns(account);
        let (entity_kind, entity_id) = columns(entity);
        let rights: Option<Vec<String>> = sqlx::query_scalar(
            r#"
            SELECT rights FROM memberships
            WHERE account_kind = $1 AND account_id = $2 AND entity_kind = $3 AND entity_id = $4
            "#,
        )
        .bind(account_kind)
        .bind(account_id)
        .bind(entity_kind)
        .bind(entity_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(rights.map(|r| Rights::from_strings(&r)))
    }

    async fn find_members(&mut self, entity: &EntityId) -> Result<Vec<(EntityId, Rights)>, AppError> {
        let (entity_kind, entity_id) = columns(entity);
        let rows: Vec<(String, String, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT account_kind, account_id, rights FROM memberships
            WHERE entity_kind = $1 AND entity_id = $2
            ORDER BY account_kind, account_id
            "#,
        )
        .bind(entity_kind)
        .bind(entity_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter()
            .map(|(kind, id, rights)| Ok((entity_ref(&kind, &id)?, Rights::from_strings(&rights))))
            .collect()
    }

    async fn find_memberships(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
        include_indirect: bool,
    ) -> Result<Vec<EntityId>, AppError> {
        let (account_kind, account_id) = columns(account);
        let indirect = include_indirect
            && account.kind() == EntityKind::User
            && kind != EntityKind::Organization;
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT entity_id FROM memberships
            WHERE account_kind = $1 AND account_id = $2 AND entity_kind = $3
            UNION
            SELECT oe.entity_id FROM memberships uo
            JOIN memberships oe
              ON oe.account_kind = 'organization' AND oe.account_id = uo.entity_id
            WHERE $4 AND uo.account_kind = $1 AND uo.account_id = $2
              AND uo.entity_kind = 'organization' AND oe.entity_kind = $3
            ORDER BY 1
            "#,
        )
        .bind(account_kind)
        .bind(account_id)
        .bind(kind.as_str())
        .bind(indirect)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids
            .into_iter()
            .filter_map(|id| EntityId::new(kind, id))
            .collect())
    }

    async fn find_account_membership_chains(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<MembershipChain>, AppError> {
        let (account_kind, account_id) = columns(account);
        let indirect = account.kind() == EntityKind::User && kind != EntityKind::Organization;
        let rows: Vec<ChainRow> = sqlx::query_as(
            r#"
            SELECT NULL::TEXT AS organization_id, NULL::TEXT[] AS organization_rights,
                   entity_id, rights
            FROM memberships
            WHERE account_kind = $1 AND account_id = $2 AND entity_kind = $3
              AND entity_id = ANY($4)
            UNION ALL
            SELECT uo.entity_id, uo.rights, oe.entity_id, oe.rights
            FROM memberships uo
            JOIN memberships oe
              ON oe.account_kind = 'organization' AND oe.account_id = uo.entity_id
            WHERE $5 AND uo.account_kind = $1 AND uo.account_id = $2
              AND uo.entity_kind = 'organization'
              AND oe.entity_kind = $3 AND oe.entity_id = ANY($4)
            "#,
        )
        .bind(account_kind)
        .bind(account_id)
        .bind(kind.as_str())
        .bind(ids)
        .bind(indirect)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut chains = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(entity) = EntityId::new(kind, row.entity_id) else {
                continue;
            };
            let entity_rights = Rights::from_strings(&row.rights);
            let chain = match (row.organization_id, row.organization_rights) {
                (Some(org_id), Some(user_rights)) => MembershipChain::indirect(
                    account.clone(),
                    Rights::from_strings(&user_rights),
                    EntityId::Organization(org_id),
                    entity_rights,
                    entity,
                ),
                _ => MembershipChain::direct(account.clone(), entity, entity_rights),
            };
            chains.push(chain);
        }
        Ok(chains)
    }

    async fn set_member(
        &mut self,
        account: &EntityId,
        entity: &EntityId,
        rights: &Rights,
    ) -> Result<(), AppError> {
        if !account.kind().can_be_member_of(entity.kind()) {
            return Err(illegal_membership(account, entity));
        }
        let (account_kind, account_id) = columns(account);
        let (entity_kind, entity_id) = columns(entity);
        if rights.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM memberships
                WHERE account_kind = $1 AND account_id = $2 AND entity_kind = $3 AND entity_id = $4
                "#,
            )
            .bind(account_kind)
            .bind(account_id)
            .bind(entity_kind)
            .bind(entity_id)
            .execute(&mut *self.tx)
            .await?;
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO memberships (account_kind, account_id, entity_kind, entity_id, rights)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_kind, account_id, entity_kind, entity_id)
            DO UPDATE SET rights = EXCLUDED.rights, updated_at = NOW()
            "#,
        )
        .bind(account_kind)
        .bind(account_id)
        .bind(entity_kind)
        .bind(entity_id)
        .bind(rights.to_strings())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_member_rights(
        &mut self,
        account: &EntityId,
        kind: EntityKind,
    ) -> Result<BTreeMap<String, Rights>, AppError> {
        let (account_kind, account_id) = columns(account);
        let rows: Vec<(String, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT entity_id, rights FROM memberships
            WHERE account_kind = $1 AND account_id = $2 AND entity_kind = $3
            "#,
        )
        .bind(account_kind)
        .bind(account_id)
        .bind(kind.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, rights)| (id, Rights::from_strings(&rights)))
            .collect())
    }

    async fn lock_entity(&mut self, entity: &EntityId) -> Result<(), AppError> {
        match entity.rights_holder() {
            EntityId::User(user_id) => {
                sqlx::query("SELECT 1 FROM users WHERE user_id = $1 FOR UPDATE")
                    .bind(user_id)
                    .fetch_optional(&mut *self.tx)
                    .await?;
            }
            holder => {
                let (kind, id) = columns(&holder);
                sqlx::query(
                    "SELECT 1 FROM entities WHERE entity_kind = $1 AND entity_id = $2 FOR UPDATE",
                )
                .bind(kind)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
            }
        }
        Ok(())
    }

    // ==================== Registry ====================

    async fn create_entity(&mut self, entity: &Entity) -> Result<(), AppError> {
        let (kind, id) = columns(&entity.ids);
        sqlx::query(
            r#"
            INSERT INTO entities (entity_kind, entity_id, name, description, contact_info, details,
                                  created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(Json(&entity.contact_info))
        .bind(Json(&entity.details))
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .bind(entity.deleted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_entity(
        &mut self,
        ids: &EntityId,
        include_deleted: bool,
    ) -> Result<Option<Entity>, AppError> {
        let (kind, id) = columns(ids);
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entities WHERE entity_kind = $1 AND entity_id = $2 \
             AND ($3 OR deleted_at IS NULL)",
            ENTITY_COLUMNS
        ))
        .bind(kind)
        .bind(id)
        .bind(include_deleted)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Entity::try_from).transpose()
    }

    async fn update_entity(&mut self, entity: &Entity) -> Result<(), AppError> {
        let (kind, id) = columns(&entity.ids);
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET name = $3, description = $4, contact_info = $5, details = $6,
                updated_at = $7, deleted_at = $8
            WHERE entity_kind = $1 AND entity_id = $2
            "#,
        )
        .bind(kind)
        .bind(&id)
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(Json(&entity.contact_info))
        .bind(Json(&entity.details))
        .bind(entity.updated_at)
        .bind(entity.deleted_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(missing(kind, id));
        }
        Ok(())
    }

    async fn purge_entity(&mut self, ids: &EntityId) -> Result<(), AppError> {
        let (kind, id) = columns(ids);
        sqlx::query(
            "DELETE FROM memberships WHERE (entity_kind = $1 AND entity_id = $2) \
             OR (account_kind = $1 AND account_id = $2)",
        )
        .bind(kind)
        .bind(&id)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query("DELETE FROM api_keys WHERE entity_kind = $1 AND entity_id = $2")
            .bind(kind)
            .bind(&id)
            .execute(&mut *self.tx)
            .await?;
        let result = sqlx::query("DELETE FROM entities WHERE entity_kind = $1 AND entity_id = $2")
            .bind(kind)
            .bind(&id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing(kind, id));
        }
        Ok(())
    }

    async fn list_entities(
        &mut self,
        kind: EntityKind,
        ids: &[String],
        include_deleted: bool,
        pagination: &Pagination,
    ) -> Result<Page<Entity>, AppError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entities WHERE entity_kind = $1 AND entity_id = ANY($2) \
             AND ($3 OR deleted_at IS NULL)",
        )
        .bind(kind.as_str())
        .bind(ids)
        .bind(include_deleted)
        .fetch_one(&mut *self.tx)
        .await?;

        let rows: Vec<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entities WHERE entity_kind = $1 AND entity_id = ANY($2) \
             AND ($3 OR deleted_at IS NULL) {} LIMIT $4 OFFSET $5",
            ENTITY_COLUMNS,
            order_clause(pagination, &["entity_id", "name", "created_at"], "entity_id"),
        ))
        .bind(kind.as_str())
        .bind(ids)
        .bind(include_deleted)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(Entity::try_from)
                .collect::<Result<_, _>>()?,
            total: total as u64,
        })
    }

    // ==================== Users ====================

    async fn create_user(&mut self, user: &User) -> Result<(), AppError> {
        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            USER_COLUMNS
        ))
        .bind(&user.user_id)
        .bind(&user.name)
        .bind(&user.description)
        .bind(&user.primary_email_address)
        .bind(user.primary_email_address_validated_at)
        .bind(&user.password_hash)
        .bind(user.password_updated_at)
        .bind(user.require_password_update)
        .bind(&user.temporary_password_hash)
        .bind(user.temporary_password_expires_at)
        .bind(user.state.as_str())
        .bind(&user.state_description)
        .bind(user.admin)
        .bind(Json(&user.contact_info))
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.deleted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_user(
        &mut self,
        user_id: &str,
        include_deleted: bool,
    ) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE user_id = $1 AND ($2 OR deleted_at IS NULL)",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(include_deleted)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_user_by_primary_email(&mut self, email: &str) -> Result<Option<User>, AppError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE LOWER(primary_email_address) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn update_user(&mut self, user: &User) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, description = $3, primary_email_address = $4,
                primary_email_address_validated_at = $5, password_hash = $6,
                password_updated_at = $7, require_password_update = $8,
                temporary_password_hash = $9, temporary_password_expires_at = $10,
                state = $11, state_description = $12, admin = $13, contact_info = $14,
                updated_at = $15, deleted_at = $16
            WHERE user_id = $1
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.name)
        .bind(&user.description)
        .bind(&user.primary_email_address)
        .bind(user.primary_email_address_validated_at)
        .bind(&user.password_hash)
        .bind(user.password_updated_at)
        .bind(user.require_password_update)
        .bind(&user.temporary_password_hash)
        .bind(user.temporary_password_expires_at)
        .bind(user.state.as_str())
        .bind(&user.state_description)
        .bind(user.admin)
        .bind(Json(&user.contact_info))
        .bind(user.updated_at)
        .bind(user.deleted_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(missing("user", &user.user_id));
        }
        Ok(())
    }

    // ==================== API keys ====================

    async fn create_api_key(&mut self, key: &ApiKey) -> Result<(), AppError> {
        let (kind, id) = columns(&key.entity);
        sqlx::query(&format!(
            "INSERT INTO api_keys ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            API_KEY_COLUMNS
        ))
        .bind(&key.id)
        .bind(&key.key_hash)
        .bind(kind)
        .bind(id)
        .bind(&key.name)
        .bind(key.rights.to_strings())
        .bind(key.expires_at)
        .bind(key.created_at)
        .bind(key.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_api_key(&mut self, id: &str) -> Result<Option<ApiKey>, AppError> {
        let row: Option<ApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM api_keys WHERE key_id = $1",
            API_KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ApiKey::try_from).transpose()
    }

    async fn find_api_keys(&mut self, entity: &EntityId) -> Result<Vec<ApiKey>, AppError> {
        let (kind, id) = columns(entity);
        let rows: Vec<ApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM api_keys WHERE entity_kind = $1 AND entity_id = $2 ORDER BY created_at",
            API_KEY_COLUMNS
        ))
        .bind(kind)
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(ApiKey::try_from).collect()
    }

    async fn update_api_key(&mut self, key: &ApiKey) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE api_keys SET name = $2, rights = $3, expires_at = $4, updated_at = $5 \
             WHERE key_id = $1",
        )
        .bind(&key.id)
        .bind(&key.name)
        .bind(key.rights.to_strings())
        .bind(key.expires_at)
        .bind(key.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(missing("api_key", &key.id));
        }
        Ok(())
    }

    async fn delete_api_key(&mut self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE key_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing("api_key", id));
        }
        Ok(())
    }

    // ==================== Sessions ====================

    async fn create_session(&mut self, session: &UserSession) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO user_sessions (session_id, user_id, secret_hash, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&session.secret_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_session(&mut self, session_id: &str) -> Result<Option<UserSession>, AppError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, user_id, secret_hash, expires_at, created_at \
             FROM user_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(UserSession::from))
    }

    async fn delete_session(&mut self, session_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing("session", session_id));
        }
        Ok(())
    }

    async fn delete_user_sessions(&mut self, user_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    // ==================== OAuth access tokens ====================

    async fn create_access_token(&mut self, token: &AccessToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO access_tokens (token_id, user_id, client_id, session_id, access_hash,
                                       rights, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&token.id)
        .bind(&token.user_id)
        .bind(&token.client_id)
        .bind(&token.session_id)
        .bind(&token.access_hash)
        .bind(token.rights.to_strings())
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_access_token(&mut self, id: &str) -> Result<Option<AccessToken>, AppError> {
        let row: Option<AccessTokenRow> = sqlx::query_as(
            "SELECT token_id, user_id, client_id, session_id, access_hash, rights, expires_at, \
             created_at FROM access_tokens WHERE token_id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(AccessToken::from))
    }

    async fn find_access_tokens(
        &mut self,
        user_id: &str,
        client_id: &str,
    ) -> Result<Vec<AccessToken>, AppError> {
        let rows: Vec<AccessTokenRow> = sqlx::query_as(
            "SELECT token_id, user_id, client_id, session_id, access_hash, rights, expires_at, \
             created_at FROM access_tokens WHERE user_id = $1 AND client_id = $2 \
             ORDER BY created_at",
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(AccessToken::from).collect())
    }

    async fn delete_access_token(&mut self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE token_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing("access_token", id));
        }
        Ok(())
    }

    // ==================== Email validations ====================

    async fn create_validation(&mut self, validation: &EmailValidation) -> Result<(), AppError> {
        let (kind, id) = columns(&validation.entity);
        sqlx::query(&format!(
            "INSERT INTO email_validations ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            VALIDATION_COLUMNS
        ))
        .bind(&validation.id)
        .bind(&validation.token_hash)
        .bind(&validation.address)
        .bind(kind)
        .bind(id)
        .bind(validation.created_at)
        .bind(validation.updated_at)
        .bind(validation.expires_at)
        .bind(validation.used_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_validation(&mut self, id: &str) -> Result<Option<EmailValidation>, AppError> {
        let row: Option<ValidationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM email_validations WHERE validation_id = $1 FOR UPDATE",
            VALIDATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(EmailValidation::try_from).transpose()
    }

    async fn find_pending_validations(
        &mut self,
        entity: &EntityId,
    ) -> Result<Vec<EmailValidation>, AppError> {
        let (kind, id) = columns(entity);
        let rows: Vec<ValidationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM email_validations \
             WHERE entity_kind = $1 AND entity_id = $2 AND used_at IS NULL FOR UPDATE",
            VALIDATION_COLUMNS
        ))
        .bind(kind)
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(EmailValidation::try_from).collect()
    }

    async fn update_validation(&mut self, validation: &EmailValidation) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE email_validations SET token_hash = $2, updated_at = $3, expires_at = $4, \
             used_at = $5 WHERE validation_id = $1",
        )
        .bind(&validation.id)
        .bind(&validation.token_hash)
        .bind(validation.updated_at)
        .bind(validation.expires_at)
        .bind(validation.used_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(missing("validation", &validation.id));
        }
        Ok(())
    }

    async fn delete_validation(&mut self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM email_validations WHERE validation_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing("validation", id));
        }
        Ok(())
    }

    // ==================== Invitations ====================

    async fn create_invitation(&mut self, invitation: &Invitation) -> Result<(), AppError> {
        sqlx::query(&format!(
            "INSERT INTO invitations ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            INVITATION_COLUMNS
        ))
        .bind(&invitation.email)
        .bind(&invitation.token_hash)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .bind(invitation.updated_at)
        .bind(&invitation.accepted_by)
        .bind(invitation.accepted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_invitation(&mut self, email: &str) -> Result<Option<Invitation>, AppError> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitations WHERE email = $1",
            INVITATION_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Invitation::from))
    }

    async fn get_invitation_by_token_hash(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, AppError> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitations WHERE token_hash = $1 FOR UPDATE",
            INVITATION_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Invitation::from))
    }

    async fn list_invitations(
        &mut self,
        pagination: &Pagination,
    ) -> Result<Page<Invitation>, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invitations")
            .fetch_one(&mut *self.tx)
            .await?;
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitations {} LIMIT $1 OFFSET $2",
            INVITATION_COLUMNS,
            order_clause(pagination, &["email", "created_at", "expires_at"], "created_at"),
        ))
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(Page {
            items: rows.into_iter().map(Invitation::from).collect(),
            total: total as u64,
        })
    }

    async fn update_invitation(&mut self, invitation: &Invitation) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE invitations SET token_hash = $2, expires_at = $3, updated_at = NOW(), \
             accepted_by = $4, accepted_at = $5 WHERE email = $1",
        )
        .bind(&invitation.email)
        .bind(&invitation.token_hash)
        .bind(invitation.expires_at)
        .bind(&invitation.accepted_by)
        .bind(invitation.accepted_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(missing("invitation", &invitation.email));
        }
        Ok(())
    }

    async fn delete_invitation(&mut self, email: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM invitations WHERE email = $1")
            .bind(email)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing("invitation", email));
        }
        Ok(())
    }

    // ==================== Transaction ====================

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
