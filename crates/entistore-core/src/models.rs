//! Domain models for Entistore.

pub mod entity;
