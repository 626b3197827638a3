//! SurrealDB implementation of [`EntityRepository`].
//!
//! Conditional updates are a single `UPDATE ... WHERE version = $version`
//! statement, so the version check and the write are atomic. A statement
//! that matches nothing returns no rows, which maps to `None`.

use chrono::{DateTime, Utc};
use entistore_core::error::EntistoreResult;
use entistore_core::filter::Filter;
use entistore_core::models::entity::{CreateEntity, Entity, EntityFields, EntityPatch};
use entistore_core::repository::{EntityRepository, Visibility};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::filter::{self, Param};
use crate::error::DbError;
use crate::schema::TableName;

/// Attempts made when an update loses a transaction conflict.
const WRITE_CONFLICT_ATTEMPTS: u32 = 5;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct EntityRow {
    version: i64,
    deleted_at: Option<DateTime<Utc>>,
    name: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    street_name: Option<String>,
    block: Option<String>,
    unit: Option<String>,
    postal_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct EntityRowWithId {
    record_id: String,
    version: i64,
    deleted_at: Option<DateTime<Utc>>,
    name: String,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    street_name: Option<String>,
    block: Option<String>,
    unit: Option<String>,
    postal_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Row struct for identity-only projections.
#[derive(Debug, SurrealValue)]
struct IdRow {
    record_id: String,
}

fn parse_id(record_id: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(record_id).map_err(|e| DbError::Decode(format!("invalid UUID: {e}")))
}

fn parse_version(version: i64) -> Result<u64, DbError> {
    u64::try_from(version).map_err(|_| DbError::Decode(format!("negative version: {version}")))
}

impl EntityRow {
    fn into_entity(self, id: Uuid) -> Result<Entity, DbError> {
        Ok(Entity {
            id,
            version: parse_version(self.version)?,
            deleted_at: self.deleted_at,
            fields: EntityFields {
                name: self.name,
                first_name: self.first_name,
                last_name: self.last_name,
                phone: self.phone,
                email: self.email,
                street_name: self.street_name,
                block: self.block,
                unit: self.unit,
                postal_code: self.postal_code,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl EntityRowWithId {
    fn try_into_entity(self) -> Result<Entity, DbError> {
        let id = parse_id(&self.record_id)?;
        EntityRow {
            version: self.version,
            deleted_at: self.deleted_at,
            name: self.name,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            email: self.email,
            street_name: self.street_name,
            block: self.block,
            unit: self.unit,
            postal_code: self.postal_code,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_entity(id)
    }
}

fn live_only(visibility: Visibility) -> bool {
    !visibility.includes_deleted()
}

/// SurrealDB implementation of the entity repository.
#[derive(Clone)]
pub struct SurrealEntityRepository<C: Connection> {
    db: Surreal<C>,
    table: TableName,
}

impl<C: Connection> SurrealEntityRepository<C> {
    pub fn new(db: Surreal<C>, table: TableName) -> Self {
        Self { db, table }
    }

    async fn select_rows(&self, query: String) -> Result<Vec<Entity>, DbError> {
        let mut result = self.db.query(query).await.map_err(DbError::from)?;
        let rows: Vec<EntityRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(EntityRowWithId::try_into_entity)
            .collect()
    }

    async fn try_update(&self, id: Uuid, patch: &EntityPatch, live_only: bool) -> Result<Option<Entity>, DbError> {
        let mut sets = vec!["version = $next_version".to_string()];
        for (field, value) in patch.fields.fields() {
            if value.is_some() {
                sets.push(format!("{col} = ${col}", col = field.column()));
            }
        }
        if patch.deleted_at.is_some() {
            sets.push("deleted_at = $deleted_at".to_string());
        }
        sets.push("updated_at = time::now()".to_string());

        let mut query = format!(
            "UPDATE type::record('{}', $id) SET {} WHERE version = $version",
            self.table,
            sets.join(", ")
        );
        if live_only {
            query.push_str(" AND deleted_at IS NONE");
        }

        // `update` only gets here when `can_match` holds, so both fit in an i64.
        let mut builder = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("version", patch.version as i64))
            .bind(("next_version", patch.next_version() as i64));

        for (field, value) in patch.fields.fields() {
            if let Some(value) = value {
                builder = builder.bind((field.column(), value.to_string()));
            }
        }
        if let Some(deleted_at) = patch.deleted_at {
            builder = builder.bind(("deleted_at", deleted_at));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result.check().map_err(DbError::from_statement)?;

        let rows: Vec<EntityRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(|row| row.into_entity(id))
            .transpose()
    }
}

impl<C: Connection> EntityRepository for SurrealEntityRepository<C> {
    async fn create(&self, input: CreateEntity) -> EntistoreResult<Entity> {
        input.validate()?;

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let fields = input.fields;

        let mut sets = vec!["version = 0".to_string(), "name = $name".to_string()];
        for (field, value) in fields.optional_fields() {
            if value.is_some() {
                sets.push(format!("{col} = ${col}", col = field.column()));
            }
        }

        let query = format!(
            "CREATE type::record('{}', $id) SET {}",
            self.table,
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(query)
            .bind(("id", id_str.clone()))
            .bind(("name", fields.name.clone()));
        for (field, value) in fields.optional_fields() {
            if let Some(value) = value {
                builder = builder.bind((field.column(), value.to_string()));
            }
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result.check().map_err(DbError::from_statement)?;

        let rows: Vec<EntityRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Decode(format!("create of {id_str} returned no row")))?;

        Ok(row.into_entity(id)?)
    }

    async fn get_by_id(&self, id: Uuid, visibility: Visibility) -> EntistoreResult<Option<Entity>> {
        let mut query = format!("SELECT * FROM type::record('{}', $id)", self.table);
        if live_only(visibility) {
            query.push_str(" WHERE deleted_at IS NONE");
        }

        let mut result = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<EntityRow> = result.take(0).map_err(DbError::from)?;
        let entity = rows
            .into_iter()
            .next()
            .map(|row| row.into_entity(id))
            .transpose()?;
        Ok(entity)
    }

    async fn find_raw(&self, filter: Filter) -> EntistoreResult<Vec<Entity>> {
        let compiled = filter::compile(&filter);
        let condition = if filter.matches_everything() {
            String::new()
        } else {
            format!(" WHERE {}", compiled.clause)
        };
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM {}{condition} ORDER BY created_at ASC",
            self.table
        );

        let mut builder = self.db.query(query);
        for (name, param) in compiled.params {
            builder = match param {
                Param::Text(v) => builder.bind((name, v)),
                Param::Integer(v) => builder.bind((name, v)),
                Param::Timestamp(v) => builder.bind((name, v)),
                Param::Texts(v) => builder.bind((name, v)),
                Param::Integers(v) => builder.bind((name, v)),
                Param::Timestamps(v) => builder.bind((name, v)),
            };
        }

        let mut result = builder.await.map_err(DbError::from)?;
        let rows: Vec<EntityRowWithId> = result.take(0).map_err(DbError::from)?;
        let entities = rows
            .into_iter()
            .map(EntityRowWithId::try_into_entity)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(table = %self.table, matched = entities.len(), "Raw filter evaluated");
        Ok(entities)
    }

    async fn list(&self, visibility: Visibility) -> EntistoreResult<Vec<Entity>> {
        let condition = if live_only(visibility) {
            " WHERE deleted_at IS NONE"
        } else {
            ""
        };
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM {}{condition} ORDER BY created_at ASC",
            self.table
        );
        Ok(self.select_rows(query).await?)
    }

    async fn list_ids(&self, visibility: Visibility) -> EntistoreResult<Vec<Uuid>> {
        let condition = if live_only(visibility) {
            " WHERE deleted_at IS NONE"
        } else {
            ""
        };
        let query = format!(
            "SELECT meta::id(id) AS record_id, created_at FROM {}{condition} \
             ORDER BY created_at ASC",
            self.table
        );

        let mut result = self.db.query(query).await.map_err(DbError::from)?;
        let rows: Vec<IdRow> = result.take(0).map_err(DbError::from)?;
        let ids = rows
            .iter()
            .map(|row| parse_id(&row.record_id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: EntityPatch,
        visibility: Visibility,
    ) -> EntistoreResult<Option<Entity>> {
        patch.validate()?;
        if !patch.can_match() {
            debug!(%id, version = patch.version, "Base version is beyond any stored version");
            return Ok(None);
        }

        let mut attempt = 1;
        loop {
            match self.try_update(id, &patch, live_only(visibility)).await {
                Ok(None) => {
                    debug!(
                        %id,
                        version = patch.version,
                        soft_delete = patch.is_soft_delete(),
                        "Conditional update matched nothing"
                    );
                    return Ok(None);
                }
                Ok(updated) => return Ok(updated),
                Err(err) if err.is_write_conflict() && attempt < WRITE_CONFLICT_ATTEMPTS => {
                    debug!(%id, attempt, error = %err, "Retrying update after write conflict");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn soft_delete(&self, id: Uuid, version: u64) -> EntistoreResult<Option<Entity>> {
        let patch = EntityPatch::soft_delete(version, Utc::now());
        self.update(id, patch, Visibility::LiveOnly).await
    }
}
