//! Entistore Core: domain model and storage contract shared by all crates.
//!
//! - [`models::entity`]: the versioned, soft-deletable document and its
//!   create/patch payloads
//! - [`filter`]: typed raw-filter expressions for trusted callers
//! - [`repository`]: the async [`repository::EntityRepository`] contract
//! - [`error`]: the store's failure kinds

pub mod error;
pub mod filter;
pub mod models;
pub mod repository;

pub use error::{EntistoreError, EntistoreResult};
