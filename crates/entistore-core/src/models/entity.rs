//! Entity domain model.
//!
//! An entity is a single persisted document. Its `version` is the
//! optimistic concurrency token: it starts at 0, every accepted mutation
//! advances it by exactly one, and a mutation must carry the version it
//! was based on. Soft-deleted entities keep their data and carry a
//! `deleted_at` timestamp that is never cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EntistoreError, EntistoreResult};

/// Longest accepted value for any domain field, in characters.
pub const MAX_FIELD_LEN: usize = 256;

/// Highest version the store can hold (versions are persisted as signed
/// 64-bit integers).
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// Storage type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Integer,
    Timestamp,
    Text,
}

/// Every addressable field of an entity, system fields included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityField {
    Id,
    Version,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
    Name,
    FirstName,
    LastName,
    Phone,
    Email,
    StreetName,
    Block,
    Unit,
    PostalCode,
}

impl EntityField {
    /// Resolves a JSON key. Mongo-style `_id` / `__v` are accepted as
    /// aliases for `id` / `version`.
    pub fn from_key(key: &str) -> Option<Self> {
        let field = match key {
            "id" | "_id" => Self::Id,
            "version" | "__v" => Self::Version,
            "deletedAt" => Self::DeletedAt,
            "createdAt" => Self::CreatedAt,
            "updatedAt" => Self::UpdatedAt,
            "name" => Self::Name,
            "firstName" => Self::FirstName,
            "lastName" => Self::LastName,
            "phone" => Self::Phone,
            "email" => Self::Email,
            "streetName" => Self::StreetName,
            "block" => Self::Block,
            "unit" => Self::Unit,
            "postalCode" => Self::PostalCode,
            _ => return None,
        };
        Some(field)
    }

    /// JSON key as exposed over the API.
    pub fn key(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Version => "version",
            Self::DeletedAt => "deletedAt",
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Name => "name",
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::StreetName => "streetName",
            Self::Block => "block",
            Self::Unit => "unit",
            Self::PostalCode => "postalCode",
        }
    }

    /// Storage column name.
    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Version => "version",
            Self::DeletedAt => "deleted_at",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Name => "name",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::StreetName => "street_name",
            Self::Block => "block",
            Self::Unit => "unit",
            Self::PostalCode => "postal_code",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::Id => FieldKind::Id,
            Self::Version => FieldKind::Integer,
            Self::DeletedAt | Self::CreatedAt | Self::UpdatedAt => FieldKind::Timestamp,
            _ => FieldKind::Text,
        }
    }
}

/// A persisted, versioned document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: Uuid,
    /// Optimistic concurrency token.
    pub version: u64,
    /// Set once by a soft-delete; absent while the entity is live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: EntityFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Named scalar attributes of an entity. `name` is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl EntityFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Optional fields in declaration order.
    pub fn optional_fields(&self) -> [(EntityField, Option<&str>); 8] {
        [
            (EntityField::FirstName, self.first_name.as_deref()),
            (EntityField::LastName, self.last_name.as_deref()),
            (EntityField::Phone, self.phone.as_deref()),
            (EntityField::Email, self.email.as_deref()),
            (EntityField::StreetName, self.street_name.as_deref()),
            (EntityField::Block, self.block.as_deref()),
            (EntityField::Unit, self.unit.as_deref()),
            (EntityField::PostalCode, self.postal_code.as_deref()),
        ]
    }
}

/// Fields required to create a new entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntity {
    #[serde(flatten)]
    pub fields: EntityFields,
}

impl CreateEntity {
    pub fn new(fields: EntityFields) -> Self {
        Self { fields }
    }

    /// Checks the payload before it is persisted.
    pub fn validate(&self) -> EntistoreResult<()> {
        validate_name(&self.fields.name)?;
        for (field, value) in self.fields.optional_fields() {
            if let Some(value) = value {
                validate_length(field.key(), value)?;
            }
        }
        Ok(())
    }
}

/// Domain fields that a patch may change. Absent fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFieldsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl EntityFieldsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// All patchable fields, `name` first.
    pub fn fields(&self) -> [(EntityField, Option<&str>); 9] {
        [
            (EntityField::Name, self.name.as_deref()),
            (EntityField::FirstName, self.first_name.as_deref()),
            (EntityField::LastName, self.last_name.as_deref()),
            (EntityField::Phone, self.phone.as_deref()),
            (EntityField::Email, self.email.as_deref()),
            (EntityField::StreetName, self.street_name.as_deref()),
            (EntityField::Block, self.block.as_deref()),
            (EntityField::Unit, self.unit.as_deref()),
            (EntityField::PostalCode, self.postal_code.as_deref()),
        ]
    }
}

/// A conditional mutation: applies only if the stored version still
/// equals `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPatch {
    /// The version the caller read before mutating.
    pub version: u64,
    pub fields: EntityFieldsPatch,
    /// Only set by [`EntityPatch::soft_delete`].
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EntityPatch {
    pub fn new(version: u64, fields: EntityFieldsPatch) -> Self {
        Self {
            version,
            fields,
            deleted_at: None,
        }
    }

    /// The restricted `{version, deletedAt}` payload used for soft-deletes.
    pub fn soft_delete(version: u64, at: DateTime<Utc>) -> Self {
        Self {
            version,
            fields: EntityFieldsPatch::default(),
            deleted_at: Some(at),
        }
    }

    pub fn is_soft_delete(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether any stored entity could be at `version` and still advance.
    /// A patch that cannot match is a stale write, not a malformed one.
    pub fn can_match(&self) -> bool {
        self.version < MAX_VERSION
    }

    /// The version the entity will carry once this patch is applied.
    pub fn next_version(&self) -> u64 {
        self.version.saturating_add(1)
    }

    pub fn validate(&self) -> EntistoreResult<()> {
        if self.is_soft_delete() && !self.fields.is_empty() {
            return Err(EntistoreError::validation(
                "a soft-delete cannot change domain fields",
            ));
        }
        if let Some(name) = &self.fields.name {
            validate_name(name)?;
        }
        for (field, value) in self.fields.fields() {
            if let Some(value) = value {
                validate_length(field.key(), value)?;
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> EntistoreResult<()> {
    if name.trim().is_empty() {
        return Err(EntistoreError::validation("name must not be blank"));
    }
    validate_length("name", name)
}

fn validate_length(field: &str, value: &str) -> EntistoreResult<()> {
    if value.chars().count() > MAX_FIELD_LEN {
        return Err(EntistoreError::validation(format!(
            "{field} must be at most {MAX_FIELD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_keys_round_trip() {
        for (field, _) in EntityFieldsPatch::default().fields() {
            assert_eq!(EntityField::from_key(field.key()), Some(field));
        }
        assert_eq!(EntityField::from_key("_id"), Some(EntityField::Id));
        assert_eq!(EntityField::from_key("__v"), Some(EntityField::Version));
        assert_eq!(EntityField::DeletedAt.column(), "deleted_at");
    }

    #[test]
    fn create_requires_name() {
        let err = serde_json::from_value::<CreateEntity>(json!({ "email": "a@b.c" }));
        assert!(err.is_err());

        let blank = CreateEntity::new(EntityFields::named("   "));
        assert!(blank.validate().unwrap_err().is_validation());
    }

    #[test]
    fn create_rejects_oversized_fields() {
        let mut fields = EntityFields::named("A");
        fields.unit = Some("x".repeat(MAX_FIELD_LEN + 1));
        let err = CreateEntity::new(fields).validate().unwrap_err();
        assert!(err.to_string().contains("unit"));
    }

    #[test]
    fn create_accepts_camel_case_payload() {
        let input: CreateEntity = serde_json::from_value(json!({
            "name": "A",
            "firstName": "Ada",
            "postalCode": "018956"
        }))
        .unwrap();
        assert_eq!(input.fields.first_name.as_deref(), Some("Ada"));
        assert_eq!(input.fields.postal_code.as_deref(), Some("018956"));
        input.validate().unwrap();
    }

    #[test]
    fn create_rejects_non_string_fields() {
        let err = serde_json::from_value::<CreateEntity>(json!({ "name": 42 }));
        assert!(err.is_err());
    }

    #[test]
    fn live_entity_omits_deleted_at() {
        let now = Utc::now();
        let entity = Entity {
            id: Uuid::new_v4(),
            version: 0,
            deleted_at: None,
            fields: EntityFields::named("A"),
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&entity).unwrap();
        assert!(value.get("deletedAt").is_none());
        assert_eq!(value["name"], "A");
        assert_eq!(value["version"], 0);
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn soft_delete_patch_only_carries_version_and_timestamp() {
        let at = Utc::now();
        let patch = EntityPatch::soft_delete(2, at);
        assert!(patch.is_soft_delete());
        assert!(patch.fields.is_empty());
        assert_eq!(patch.deleted_at, Some(at));
        assert_eq!(patch.next_version(), 3);
    }

    #[test]
    fn patch_rejects_blank_name() {
        let patch = EntityPatch::new(
            0,
            EntityFieldsPatch {
                name: Some(String::new()),
                ..Default::default()
            },
        );
        assert!(patch.validate().is_err());
    }

    #[test]
    fn version_at_ceiling_is_valid_but_cannot_match() {
        let patch = EntityPatch::new(MAX_VERSION, EntityFieldsPatch::default());
        patch.validate().unwrap();
        assert!(!patch.can_match());
        assert!(!EntityPatch::new(u64::MAX, EntityFieldsPatch::default()).can_match());
        assert!(EntityPatch::new(MAX_VERSION - 1, EntityFieldsPatch::default()).can_match());
    }

    #[test]
    fn soft_delete_rejects_field_changes() {
        let mut patch = EntityPatch::soft_delete(0, Utc::now());
        patch.validate().unwrap();
        patch.fields.name = Some("B".into());
        assert!(patch.validate().unwrap_err().is_validation());
    }

    #[test]
    fn patch_ignores_unknown_keys() {
        let patch: EntityFieldsPatch = serde_json::from_value(json!({
            "id": "whatever",
            "version": 3,
            "name": "B"
        }))
        .unwrap();
        assert_eq!(patch.name.as_deref(), Some("B"));
    }
}
