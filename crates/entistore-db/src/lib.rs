//! Entistore Database: SurrealDB connection management, schema bootstrap
//! and the entity store.
//!
//! This crate provides:
//! - Connection management with retry and health monitoring
//!   ([`DbManager`], [`DbConfig`], [`ConnectionState`])
//! - Idempotent collection bootstrap ([`bootstrap`])
//! - The SurrealDB entity store ([`repository::SurrealEntityRepository`])
//! - Error types ([`DbError`])

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{ConnectionState, DbConfig, DbManager};
pub use error::DbError;
pub use schema::{DEFAULT_TABLE, TableName, bootstrap, collection_ddl};
