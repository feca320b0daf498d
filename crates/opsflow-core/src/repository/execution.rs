//! Execution repository trait definition.
//!
//! Covers three entity families:
//! - **Executions:** durable run state (current step, variables, history).
//! - **Leases:** the single-writer lock taken around each dispatcher tick.
//! - **Approvals:** human checkpoints, unique per `(execution, step slug)`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opsflow_types::approval::{Approval, ApprovalStatus};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{Execution, ExecutionStatus};
use uuid::Uuid;

/// Repository trait for executions, leases, and approvals.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist the full execution state in one write.
    fn save_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Most recent first.
    fn list_executions(
        &self,
        organization_id: &str,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Number of executions per status in one organization. Statuses with
    /// no executions are omitted.
    fn count_executions(
        &self,
        organization_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<(ExecutionStatus, u64)>, RepositoryError>> + Send;

    /// `running` executions across all organizations with no live lease at `now`.
    fn list_stalled(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Take (or renew) the exclusive lease on an execution.
    ///
    /// Returns `false` when another holder owns an unexpired lease and
    /// `NotFound` when the execution does not belong to the organization.
    fn try_acquire_lease(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
        holder: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Release a lease if `holder` still owns it.
    fn release_lease(
        &self,
        execution_id: &Uuid,
        holder: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    /// Returns `Duplicate` if an approval already exists for the
    /// `(wf_execution_id, step_slug)` pair.
    fn create_approval(
        &self,
        approval: &Approval,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_approval(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Approval>, RepositoryError>> + Send;

    fn find_approval(
        &self,
        organization_id: &str,
        wf_execution_id: &Uuid,
        step_slug: &str,
    ) -> impl std::future::Future<Output = Result<Option<Approval>, RepositoryError>> + Send;

    /// Move a pending approval to `status`. Returns `Conflict` if it was
    /// already resolved.
    fn resolve_approval(
        &self,
        organization_id: &str,
        id: &Uuid,
        status: ApprovalStatus,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Approval, RepositoryError>> + Send;

    fn list_approvals(
        &self,
        organization_id: &str,
        status: Option<ApprovalStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<Approval>, RepositoryError>> + Send;
}
