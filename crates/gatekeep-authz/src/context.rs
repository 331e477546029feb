//! Per-request identity, deadline and cancellation.

use std::time::Duration;

use gatekeep_core::error::{GatekeepError, GatekeepResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AuthzError;

/// Caller identity as supplied by the session layer, plus the deadline and
/// cancellation signal every authorization call honours.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    /// Trusted as-is. Inactive users are denied without touching the stores.
    pub user_active: bool,
    pub deadline: Option<Instant>,
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            user_active: true,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_user_active(mut self, active: bool) -> Self {
        self.user_active = active;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.user_id.is_nil() {
            return Err(AuthzError::NilUser);
        }
        Ok(())
    }

    /// Drive `work` to completion unless the request is cancelled or its
    /// deadline passes first. An aborted future is dropped.
    pub async fn run<T, F>(&self, work: F) -> GatekeepResult<T>
    where
        F: Future<Output = GatekeepResult<T>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(GatekeepError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => Err(GatekeepError::Cancelled),
                outcome = tokio::time::timeout_at(deadline, work) => {
                    outcome.unwrap_or(Err(GatekeepError::DeadlineExceeded))
                }
            },
            None => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => Err(GatekeepError::Cancelled),
                outcome = work => outcome,
            },
        }
    }
}
