//! Gatekeep Database — SurrealDB connection management, schema migrations
//! and repository implementations.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Repositories for the `gatekeep-core` traits ([`repository`])
//! - The shared tier of the permission cache ([`SurrealPermissionCache`])
//! - Error types ([`DbError`])

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use repository::SurrealPermissionCache;
pub use schema::{run_migrations, schema_v1};
