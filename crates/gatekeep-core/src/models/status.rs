//! Activation status shared by catalog entities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatekeepError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EntityStatus {
    #[default]
    Active,
    Inactive,
}

impl EntityStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Inactive" => Ok(Self::Inactive),
            other => Err(GatekeepError::validation(format!(
                "unknown entity status: {other}"
            ))),
        }
    }
}

/// Mandatory status filter for list reads.
///
/// Every listing operation takes one of these explicitly so a caller can
/// never pull inactive entities into evaluation by forgetting a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    ActiveOnly,
    Any,
}

impl StatusFilter {
    pub fn admits(self, status: EntityStatus) -> bool {
        match self {
            Self::ActiveOnly => status.is_active(),
            Self::Any => true,
        }
    }
}
