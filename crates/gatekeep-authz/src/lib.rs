//! Gatekeep Authz — permission evaluation, the two-tier permission cache
//! and the services built on top of them.
//!
//! Generic over the `gatekeep-core` repository traits so that this crate
//! has no dependency on the database crate.

pub mod admin;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod service;

pub use admin::{LinkOutcome, PermissionAdminService};
pub use audit::{AuditPage, AuditTrail};
pub use cache::{InMemoryDistributedCache, PermissionCache};
pub use config::AuthzConfig;
pub use context::RequestContext;
pub use engine::{DecisionReason, EffectivePermissions, EvaluationInput, EvaluationResult};
pub use error::AuthzError;
pub use service::{AuthorizationDecision, AuthorizationService};
