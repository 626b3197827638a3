//! Shared router state.

use std::sync::Arc;

use entistore_core::repository::EntityRepository;
use entistore_db::DbManager;

use crate::config::ApiConfig;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: DbManager,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(db: DbManager, config: ApiConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    /// The entity store over the current connection.
    ///
    /// The readiness gate normally answers first; this covers a connection
    /// lost between the gate and the handler.
    pub fn store(&self) -> Result<impl EntityRepository + use<>, ApiError> {
        self.db.repository().ok_or(ApiError::Unavailable)
    }
}
