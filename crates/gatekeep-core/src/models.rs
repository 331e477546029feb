//! Domain models for Gatekeep.
//!
//! Entities are plain data. Ids are UUIDs, relationships are expressed
//! through ids rather than object references, and nothing is physically
//! deleted from the catalog: entities carry an [`status::EntityStatus`]
//! tag instead.

pub mod audit;
pub mod permission;
pub mod role;
pub mod status;
pub mod user_permission;
