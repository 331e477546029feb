//! Authorization error types.

use gatekeep_core::error::GatekeepError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("user id must not be nil")]
    NilUser,

    #[error("permission name must not be empty")]
    EmptyPermissionName,

    #[error("malformed permission name {name:?}: {message}")]
    MalformedPermissionName { name: String, message: String },

    #[error("permission name list must not be empty")]
    EmptyPermissionList,

    #[error("permission {permission} cannot take {candidate} as parent")]
    ParentCycle { permission: String, candidate: String },

    #[error("permission store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<AuthzError> for GatekeepError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::NilUser
            | AuthzError::EmptyPermissionName
            | AuthzError::MalformedPermissionName { .. }
            | AuthzError::EmptyPermissionList
            | AuthzError::ParentCycle { .. } => GatekeepError::Validation {
                message: err.to_string(),
            },
            AuthzError::StoreUnavailable(_) => GatekeepError::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_validation_errors() {
        let err: GatekeepError = AuthzError::EmptyPermissionList.into();
        assert!(matches!(err, GatekeepError::Validation { .. }));
    }

    #[test]
    fn store_failures_hide_details() {
        let err: GatekeepError = AuthzError::StoreUnavailable("connection refused".into()).into();
        assert!(matches!(err, GatekeepError::Unavailable));
        assert!(!err.to_string().contains("refused"));
    }
}
