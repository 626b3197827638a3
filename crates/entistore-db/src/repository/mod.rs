//! SurrealDB repository implementations.

mod entity;
mod filter;

pub use entity::SurrealEntityRepository;
