//! Gatekeep Core — domain models, the permission catalog, repository
//! traits and the shared error type.
//!
//! Nothing in this crate performs I/O. Storage backends implement the
//! traits in [`repository`]; the evaluation engine and cache live in
//! `gatekeep-authz`.

pub mod cache;
pub mod catalog;
pub mod error;
pub mod models;
pub mod repository;

pub use cache::{CacheError, DistributedCache};
pub use catalog::Catalog;
pub use error::{GatekeepError, GatekeepResult};
