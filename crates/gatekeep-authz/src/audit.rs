//! Read and append access to the permission audit log.

use gatekeep_core::error::{GatekeepError, GatekeepResult};
use gatekeep_core::models::audit::{CreateAuditLogEntry, PermissionAuditLog};
use gatekeep_core::repository::{AuditLogFilter, AuditLogRepository, Pagination};
use serde::Serialize;
use uuid::Uuid;

pub const MAX_PAGE_SIZE: u64 = 200;

/// One page of audit entries, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<PermissionAuditLog>,
    pub total_count: u64,
    /// 1-based.
    pub page: u64,
    pub page_size: u64,
}

impl AuditPage {
    pub fn total_pages(&self) -> u64 {
        self.total_count.div_ceil(self.page_size)
    }
}

pub struct AuditTrail<A: AuditLogRepository> {
    repo: A,
}

impl<A: AuditLogRepository> AuditTrail<A> {
    pub fn new(repo: A) -> Self {
        Self { repo }
    }

    /// Append a standalone entry, returning its id.
    #[tracing::instrument(skip(self, entry), fields(permission_id = %entry.permission_id, action = %entry.action))]
    pub async fn record(&self, entry: CreateAuditLogEntry) -> GatekeepResult<Uuid> {
        let entry = self.repo.append(entry).await?;
        Ok(entry.id)
    }

    /// Page through matching entries. `page` starts at 1; `page_size` is
    /// clamped to `1..=200`.
    #[tracing::instrument(skip(self, filter))]
    pub async fn query(
        &self,
        filter: AuditLogFilter,
        page: u64,
        page_size: u64,
    ) -> GatekeepResult<AuditPage> {
        let pagination = pagination(&filter, page, page_size)?;
        let page_size = pagination.limit;
        let result = self.repo.list(filter, pagination).await?;
        Ok(AuditPage {
            entries: result.items,
            total_count: result.total,
            page,
            page_size,
        })
    }
}

fn pagination(filter: &AuditLogFilter, page: u64, page_size: u64) -> GatekeepResult<Pagination> {
    if page == 0 {
        return Err(GatekeepError::validation("page numbers start at 1"));
    }
    if let (Some(from), Some(to)) = (filter.from, filter.to)
        && from >= to
    {
        return Err(GatekeepError::validation(
            "audit window start must precede its end",
        ));
    }
    let limit = page_size.clamp(1, MAX_PAGE_SIZE);
    Ok(Pagination {
        offset: (page - 1).saturating_mul(limit),
        limit,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn pages_are_one_based() {
        let filter = AuditLogFilter::default();
        assert!(pagination(&filter, 0, 10).is_err());
        let p = pagination(&filter, 3, 10).unwrap();
        assert_eq!((p.offset, p.limit), (20, 10));
    }

    #[test]
    fn page_size_is_clamped() {
        let filter = AuditLogFilter::default();
        assert_eq!(pagination(&filter, 1, 0).unwrap().limit, 1);
        assert_eq!(pagination(&filter, 1, 5_000).unwrap().limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn inverted_window_rejected() {
        let now = Utc::now();
        let filter = AuditLogFilter {
            from: Some(now),
            to: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            pagination(&filter, 1, 10),
            Err(GatekeepError::Validation { .. })
        ));
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = AuditPage {
            entries: Vec::new(),
            total_count: 21,
            page: 1,
            page_size: 10,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
