//! HTTP surface configuration.

use entistore_db::DEFAULT_TABLE;

/// Configuration for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Collection served under `/{collection}`. Must match the table the
    /// storage connection bootstraps.
    pub collection: String,
    /// Reported by `GET /`.
    pub service_name: String,
    /// Reported by `GET /`.
    pub service_version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_TABLE.into(),
            service_name: env!("CARGO_PKG_NAME").into(),
            service_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl ApiConfig {
    pub fn collection_path(&self) -> String {
        format!("/{}", self.collection)
    }

    pub fn item_path(&self) -> String {
        format!("/{}/{{id}}", self.collection)
    }
}
