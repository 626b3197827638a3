//! Request handlers for the entity collection.
//!
//! Mutations follow one protocol: check that the entity is visible, require
//! the base `version` from the body, then run a single conditional write.
//! An invisible entity is 404, a missing version is 400, and a write that
//! matches nothing on a visible entity is a version conflict (409). A numeric
//! version no entity can hold is such a write.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use entistore_core::error::EntistoreError;
use entistore_core::filter::Filter;
use entistore_core::models::entity::{CreateEntity, Entity, EntityFieldsPatch, EntityPatch};
use entistore_core::repository::{EntityRepository, Visibility};
use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Body keys accepted for the base version. `__v` is the document-store
/// spelling.
const VERSION_KEYS: [&str; 2] = ["version", "__v"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default, deserialize_with = "flag")]
    pub get_ids: bool,
    #[serde(default, deserialize_with = "flag")]
    pub inc_deleted: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    #[serde(default, deserialize_with = "flag")]
    pub inc_deleted: bool,
}

/// Query-string switch: `true`, `1` or a bare key turn it on; `false` and
/// `0` turn it off.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.to_ascii_lowercase().as_str() {
        "" | "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(de::Error::invalid_value(
            Unexpected::Str(&raw),
            &"true, false, 1 or 0",
        )),
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

// -----------------------------------------------------------------------
// Service routes
// -----------------------------------------------------------------------

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    })
}

pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

// -----------------------------------------------------------------------
// Collection routes
// -----------------------------------------------------------------------

pub async fn create_entity(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    let store = state.store()?;
    let input: CreateEntity = typed(parse_body(&body)?)?;

    let entity = store.create(input).await?;
    info!(id = %entity.id, "Entity created");
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn list_entities(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let store = state.store()?;
    let visibility = Visibility::from_include_deleted(query.inc_deleted);

    if query.get_ids {
        let ids = store.list_ids(visibility).await?;
        return Ok(Json(ids).into_response());
    }
    let entities = store.list(visibility).await?;
    Ok(Json(entities).into_response())
}

/// `GET /{collection}/{id}`. A segment that parses as a filter object is
/// evaluated as a raw filter, bypassing soft-delete visibility.
pub async fn get_entity(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let store = state.store()?;

    if let Ok(filter) = Filter::parse(&segment) {
        let entities = store.find_raw(filter).await?;
        return Ok(Json(entities).into_response());
    }

    let id = parse_id(&segment)?;
    let entity = store
        .get_by_id(id, Visibility::from_include_deleted(query.inc_deleted))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(entity).into_response())
}

pub async fn update_entity(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<Json<Entity>, ApiError> {
    let store = state.store()?;
    let id = parse_id(&segment)?;
    ensure_visible(&store, id).await?;

    let body = parse_body(&body)?;
    let version = required_version(&body)?;
    let fields: EntityFieldsPatch = typed(body)?;

    let entity = apply(&store, id, EntityPatch::new(version, fields)).await?;
    info!(%id, version = entity.version, "Entity updated");
    Ok(Json(entity))
}

/// Soft-delete. Only the body's `version` is used; the write is the
/// restricted `{version, deletedAt: now}` patch.
pub async fn delete_entity(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<Json<Entity>, ApiError> {
    let store = state.store()?;
    let id = parse_id(&segment)?;
    ensure_visible(&store, id).await?;

    let version = required_version(&parse_body(&body)?)?;

    let entity = apply(&store, id, EntityPatch::soft_delete(version, Utc::now())).await?;
    info!(%id, version = entity.version, "Entity soft-deleted");
    Ok(Json(entity))
}

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

/// Unparseable identifiers cannot name an entity.
fn parse_id(segment: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(segment).map_err(|_| ApiError::NotFound)
}

/// An empty body is an empty object.
fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {e}")))
}

/// Deserializes into a static payload type. Type mismatches are
/// validation failures.
fn typed<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| EntistoreError::validation(e.to_string()).into())
}

/// Numbers that are not a non-negative integer cannot equal any stored
/// version, so they conflict. Non-numbers are payload type mismatches.
fn required_version(body: &Value) -> Result<u64, ApiError> {
    let raw = VERSION_KEYS
        .iter()
        .find_map(|key| body.get(key).filter(|v| !v.is_null()))
        .ok_or_else(|| ApiError::BadRequest("version is required".into()))?;

    match raw {
        Value::Number(n) => n.as_u64().ok_or_else(|| {
            debug!(version = %n, "Base version matches no entity");
            ApiError::VersionConflict
        }),
        other => Err(EntistoreError::validation(format!(
            "version must be a number, got {other}"
        ))
        .into()),
    }
}

async fn ensure_visible<R: EntityRepository>(store: &R, id: Uuid) -> Result<(), ApiError> {
    store
        .get_by_id(id, Visibility::LiveOnly)
        .await?
        .map(|_| ())
        .ok_or(ApiError::NotFound)
}

async fn apply<R: EntityRepository>(store: &R, id: Uuid, patch: EntityPatch) -> Result<Entity, ApiError> {
    let version = patch.version;
    match store.update(id, patch, Visibility::LiveOnly).await? {
        Some(entity) => Ok(entity),
        None => {
            debug!(%id, version, "Rejected stale write");
            Err(ApiError::VersionConflict)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_is_required_and_non_null() {
        assert!(matches!(
            required_version(&json!({ "name": "A" })),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            required_version(&json!({ "version": null })),
            Err(ApiError::BadRequest(_))
        ));
        assert_eq!(required_version(&json!({ "version": 3 })).unwrap(), 3);
        assert_eq!(required_version(&json!({ "__v": 0 })).unwrap(), 0);
    }

    #[test]
    fn mistyped_version_is_a_validation_failure() {
        let err = required_version(&json!({ "version": "one" })).unwrap_err();
        assert!(matches!(err, ApiError::Store(EntistoreError::Validation { .. })));
    }

    #[test]
    fn unrepresentable_versions_conflict() {
        for version in [json!(-1), json!(0.5), json!(-9223372036854775808i64), json!(1e300)] {
            assert!(
                matches!(
                    required_version(&json!({ "version": version })),
                    Err(ApiError::VersionConflict)
                ),
                "{version}"
            );
        }
        assert_eq!(
            required_version(&json!({ "version": u64::MAX })).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn empty_body_is_an_empty_object() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), json!({}));
        assert!(matches!(
            parse_body(&Bytes::from_static(b"{oops")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn invalid_identifier_is_not_found() {
        assert!(matches!(parse_id("not-a-uuid"), Err(ApiError::NotFound)));
    }

    #[test]
    fn list_query_defaults_to_live_entities() {
        let query = ListQuery::default();
        assert!(!query.get_ids);
        assert!(!query.inc_deleted);
    }

    fn list_query(raw: &str) -> Result<ListQuery, QueryRejection> {
        let uri: axum::http::Uri = format!("/entities?{raw}").parse().unwrap();
        Query::try_from_uri(&uri).map(|Query(query)| query)
    }

    #[test]
    fn flags_accept_numeric_and_bare_spellings() {
        let query = list_query("getIds=1&incDeleted=TRUE").unwrap();
        assert!(query.get_ids && query.inc_deleted);

        let query = list_query("getIds=0&incDeleted=false").unwrap();
        assert!(!query.get_ids && !query.inc_deleted);

        assert!(list_query("getIds").unwrap().get_ids);
        assert!(list_query("getIds=maybe").is_err());
    }
}
