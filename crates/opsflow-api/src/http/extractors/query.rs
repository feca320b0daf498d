//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use opsflow_types::approval::ApprovalStatus;
use opsflow_types::execution::ExecutionStatus;

use crate::http::error::AppError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

/// Query parameters for the execution list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ExecutionListQuery {
    /// Filter by status (running, waiting_approval, succeeded, failed, cancelled).
    pub status: Option<String>,
    /// Maximum results.
    pub limit: Option<u32>,
}

impl ExecutionListQuery {
    pub fn status(&self) -> Result<Option<ExecutionStatus>, AppError> {
        self.status
            .as_deref()
            .map(|s| s.parse().map_err(AppError::Validation))
            .transpose()
    }

    pub fn limit(&self) -> u32 {
        clamp_limit(self.limit)
    }
}

/// Query parameters for the approval list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ApprovalListQuery {
    /// Filter by status; defaults to `pending`.
    pub status: Option<String>,
}

impl ApprovalListQuery {
    pub fn status(&self) -> Result<Option<ApprovalStatus>, AppError> {
        match self.status.as_deref() {
            None => Ok(Some(ApprovalStatus::Pending)),
            Some("all") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(AppError::Validation),
        }
    }
}

/// Query parameters for the trigger log endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct LogListQuery {
    pub limit: Option<u32>,
}

impl LogListQuery {
    pub fn limit(&self) -> u32 {
        clamp_limit(self.limit)
    }
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_query_parses_status() {
        let query = ExecutionListQuery {
            status: Some("waiting_approval".into()),
            limit: Some(10_000),
        };
        assert_eq!(query.status().unwrap(), Some(ExecutionStatus::WaitingApproval));
        assert_eq!(query.limit(), MAX_LIMIT);
    }

    #[test]
    fn test_execution_query_rejects_unknown_status() {
        let query = ExecutionListQuery {
            status: Some("exploded".into()),
            limit: None,
        };
        assert!(query.status().is_err());
        assert_eq!(query.limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_approval_query_defaults_to_pending() {
        assert_eq!(
            ApprovalListQuery::default().status().unwrap(),
            Some(ApprovalStatus::Pending)
        );
        let all = ApprovalListQuery {
            status: Some("all".into()),
        };
        assert_eq!(all.status().unwrap(), None);
    }
}
