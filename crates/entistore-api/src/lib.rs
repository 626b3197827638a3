//! Entistore HTTP surface.
//!
//! Maps entity store results to HTTP responses and gates every route on
//! storage readiness.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod state;

pub use config::ApiConfig;
pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
