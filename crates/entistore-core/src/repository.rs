//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Absence is a result: lookups
//! return `Option`, and a conditional write that matches nothing (unknown
//! id or stale version) returns `None` rather than an error.

use uuid::Uuid;

use crate::error::EntistoreResult;
use crate::filter::Filter;
use crate::models::entity::{CreateEntity, Entity, EntityPatch};

/// Which entities a read or conditional write may see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Only entities without `deleted_at`.
    #[default]
    LiveOnly,
    /// No restriction.
    IncludeDeleted,
}

impl Visibility {
    pub fn from_include_deleted(include_deleted: bool) -> Self {
        if include_deleted {
            Self::IncludeDeleted
        } else {
            Self::LiveOnly
        }
    }

    pub fn includes_deleted(self) -> bool {
        matches!(self, Self::IncludeDeleted)
    }
}

pub trait EntityRepository: Send + Sync {
    /// Validates and persists a new entity at version 0.
    fn create(&self, input: CreateEntity) -> impl Future<Output = EntistoreResult<Entity>> + Send;

    fn get_by_id(
        &self,
        id: Uuid,
        visibility: Visibility,
    ) -> impl Future<Output = EntistoreResult<Option<Entity>>> + Send;

    /// Returns every entity matching `filter` verbatim.
    ///
    /// This bypasses the visibility condition: soft-deleted entities are
    /// returned whenever the filter matches them. Intended for trusted,
    /// internal callers only.
    fn find_raw(&self, filter: Filter) -> impl Future<Output = EntistoreResult<Vec<Entity>>> + Send;

    fn list(
        &self,
        visibility: Visibility,
    ) -> impl Future<Output = EntistoreResult<Vec<Entity>>> + Send;

    /// Lightweight projection of [`EntityRepository::list`]: identities only.
    fn list_ids(
        &self,
        visibility: Visibility,
    ) -> impl Future<Output = EntistoreResult<Vec<Uuid>>> + Send;

    /// Atomically applies `patch` if the entity exists under `visibility`
    /// and its stored version equals `patch.version`. The new state carries
    /// `patch.version + 1`.
    fn update(
        &self,
        id: Uuid,
        patch: EntityPatch,
        visibility: Visibility,
    ) -> impl Future<Output = EntistoreResult<Option<Entity>>> + Send;

    /// Soft-delete: an [`EntityRepository::update`] with the restricted
    /// `{version, deleted_at: now}` patch.
    fn soft_delete(
        &self,
        id: Uuid,
        version: u64,
    ) -> impl Future<Output = EntistoreResult<Option<Entity>>> + Send;
}
