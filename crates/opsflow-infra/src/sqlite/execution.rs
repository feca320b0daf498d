//! SQLite execution repository implementation.
//!
//! Executions keep variables and history as JSON columns so a checkpoint is
//! a single-row UPDATE. Leases expire by wall clock (unix milliseconds) and
//! are taken with a conditional upsert, so two workers can never both hold
//! one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opsflow_core::repository::execution::ExecutionRepository;
use opsflow_types::approval::{Approval, ApprovalStatus};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{Execution, ExecutionStatus};
use sqlx::Row;
use uuid::Uuid;

use super::store::{
    format_datetime, from_json, parse_datetime, parse_enum, parse_opt_datetime, parse_uuid,
    query_err, to_json, write_err, SqliteStore,
};

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    wf_definition_id: String,
    organization_id: String,
    status: String,
    current_step_slug: Option<String>,
    variables: String,
    history: String,
    thread_id: Option<String>,
    trigger_type: Option<String>,
    started_at: String,
    finished_at: Option<String>,
    error: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            wf_definition_id: row.try_get("wf_definition_id")?,
            organization_id: row.try_get("organization_id")?,
            status: row.try_get("status")?,
            current_step_slug: row.try_get("current_step_slug")?,
            variables: row.try_get("variables")?,
            history: row.try_get("history")?,
            thread_id: row.try_get("thread_id")?,
            trigger_type: row.try_get("trigger_type")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        Ok(Execution {
            id: parse_uuid(&self.id)?,
            wf_definition_id: parse_uuid(&self.wf_definition_id)?,
            organization_id: self.organization_id,
            status: parse_enum(&self.status)?,
            current_step_slug: self.current_step_slug,
            variables: from_json(&self.variables, "execution variables")?,
            history: from_json(&self.history, "execution history")?,
            thread_id: self.thread_id,
            trigger_type: self.trigger_type.as_deref().map(parse_enum).transpose()?,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_opt_datetime(self.finished_at.as_deref())?,
            error: self
                .error
                .as_deref()
                .map(|e| from_json(e, "execution error"))
                .transpose()?,
        })
    }
}

struct ApprovalRow {
    id: String,
    organization_id: String,
    wf_execution_id: String,
    step_slug: String,
    status: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    metadata: String,
    created_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            wf_execution_id: row.try_get("wf_execution_id")?,
            step_slug: row.try_get("step_slug")?,
            status: row.try_get("status")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolved_by: row.try_get("resolved_by")?,
        })
    }

    fn into_approval(self) -> Result<Approval, RepositoryError> {
        Ok(Approval {
            id: parse_uuid(&self.id)?,
            organization_id: self.organization_id,
            wf_execution_id: parse_uuid(&self.wf_execution_id)?,
            step_slug: self.step_slug,
            status: parse_enum(&self.status)?,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            metadata: from_json(&self.metadata, "approval metadata")?,
            created_at: parse_datetime(&self.created_at)?,
            resolved_at: parse_opt_datetime(self.resolved_at.as_deref())?,
            resolved_by: self.resolved_by,
        })
    }
}

pub(crate) fn execution_from(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, RepositoryError> {
    ExecutionRow::from_row(row).map_err(query_err)?.into_execution()
}

fn approval_from(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, RepositoryError> {
    ApprovalRow::from_row(row).map_err(query_err)?.into_approval()
}

/// Column values for an INSERT into `wf_executions`, in column order.
pub(crate) struct ExecutionColumns {
    pub id: String,
    pub wf_definition_id: String,
    pub variables: String,
    pub history: String,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl ExecutionColumns {
    pub(crate) fn of(execution: &Execution) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: execution.id.to_string(),
            wf_definition_id: execution.wf_definition_id.to_string(),
            variables: to_json(&execution.variables, "execution variables")?,
            history: to_json(&execution.history, "execution history")?,
            error: execution
                .error
                .as_ref()
                .map(|e| to_json(e, "execution error"))
                .transpose()?,
            started_at: format_datetime(&execution.started_at),
            finished_at: execution.finished_at.as_ref().map(format_datetime),
        })
    }
}

pub(crate) const INSERT_EXECUTION: &str = r#"INSERT INTO wf_executions
    (id, wf_definition_id, organization_id, status, current_step_slug, variables, history,
     thread_id, trigger_type, started_at, finished_at, error)
  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

/// Bind an execution to `INSERT_EXECUTION`.
pub(crate) fn bind_insert<'q>(
    execution: &'q Execution,
    cols: &'q ExecutionColumns,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(INSERT_EXECUTION)
        .bind(&cols.id)
        .bind(&cols.wf_definition_id)
        .bind(&execution.organization_id)
        .bind(execution.status.as_str())
        .bind(&execution.current_step_slug)
        .bind(&cols.variables)
        .bind(&cols.history)
        .bind(&execution.thread_id)
        .bind(execution.trigger_type.map(|t| t.as_str()))
        .bind(&cols.started_at)
        .bind(&cols.finished_at)
        .bind(&cols.error)
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2)
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let cols = ExecutionColumns::of(execution)?;
        bind_insert(execution, &cols)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| write_err(e, || format!("execution {}", execution.id)))?;
        Ok(())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let cols = ExecutionColumns::of(execution)?;
        let result = sqlx::query(
            r#"UPDATE wf_executions SET
                 status = ?, current_step_slug = ?, variables = ?, history = ?,
                 thread_id = ?, finished_at = ?, error = ?
               WHERE id = ? AND organization_id = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_step_slug)
        .bind(&cols.variables)
        .bind(&cols.history)
        .bind(&execution.thread_id)
        .bind(&cols.finished_at)
        .bind(&cols.error)
        .bind(&cols.id)
        .bind(&execution.organization_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM wf_executions WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(execution_from).transpose()
    }

    async fn list_executions(
        &self,
        organization_id: &str,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(
            r#"SELECT * FROM wf_executions
               WHERE organization_id = ? AND (? IS NULL OR status = ?)
               ORDER BY started_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(organization_id)
        .bind(status)
        .bind(status)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(execution_from).collect()
    }

    async fn count_executions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<(ExecutionStatus, u64)>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT status, COUNT(*) AS n FROM wf_executions
               WHERE organization_id = ?
               GROUP BY status
               ORDER BY status"#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status").map_err(query_err)?;
                let n: i64 = row.try_get("n").map_err(query_err)?;
                Ok((parse_enum(&status)?, u64::try_from(n).unwrap_or(0)))
            })
            .collect()
    }

    async fn list_stalled(&self, now: DateTime<Utc>) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT e.* FROM wf_executions e
               LEFT JOIN wf_execution_leases l ON l.execution_id = e.id
               WHERE e.status = 'running' AND (l.execution_id IS NULL OR l.expires_at <= ?)
               ORDER BY e.started_at"#,
        )
        .bind(millis(now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(execution_from).collect()
    }

    async fn try_acquire_lease(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        let id = execution_id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let owned: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM wf_executions WHERE id = ? AND organization_id = ?",
        )
        .bind(&id)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;
        if owned.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let now = millis(Utc::now());
        let result = sqlx::query(
            r#"INSERT INTO wf_execution_leases (execution_id, holder, expires_at)
               VALUES (?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 holder = excluded.holder,
                 expires_at = excluded.expires_at
               WHERE wf_execution_leases.holder = excluded.holder
                  OR wf_execution_leases.expires_at <= ?"#,
        )
        .bind(&id)
        .bind(holder)
        .bind(now.saturating_add(ttl_millis(ttl)))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, execution_id: &Uuid, holder: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM wf_execution_leases WHERE execution_id = ? AND holder = ?")
            .bind(execution_id.to_string())
            .bind(holder)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn create_approval(&self, approval: &Approval) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO wf_approvals
                 (id, organization_id, wf_execution_id, step_slug, status, resource_type,
                  resource_id, metadata, created_at, resolved_at, resolved_by)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(approval.id.to_string())
        .bind(&approval.organization_id)
        .bind(approval.wf_execution_id.to_string())
        .bind(&approval.step_slug)
        .bind(approval.status.as_str())
        .bind(&approval.resource_type)
        .bind(&approval.resource_id)
        .bind(to_json(&approval.metadata, "approval metadata")?)
        .bind(format_datetime(&approval.created_at))
        .bind(approval.resolved_at.as_ref().map(format_datetime))
        .bind(&approval.resolved_by)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            write_err(e, || {
                format!(
                    "approval for step '{}' of execution {}",
                    approval.step_slug, approval.wf_execution_id
                )
            })
        })?;
        Ok(())
    }

    async fn get_approval(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM wf_approvals WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(approval_from).transpose()
    }

    async fn find_approval(
        &self,
        organization_id: &str,
        wf_execution_id: &Uuid,
        step_slug: &str,
    ) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM wf_approvals WHERE organization_id = ? AND wf_execution_id = ? AND step_slug = ?",
        )
        .bind(organization_id)
        .bind(wf_execution_id.to_string())
        .bind(step_slug)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.as_ref().map(approval_from).transpose()
    }

    async fn resolve_approval(
        &self,
        organization_id: &str,
        id: &Uuid,
        status: ApprovalStatus,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Approval, RepositoryError> {
        let id_str = id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM wf_approvals WHERE id = ? AND organization_id = ?",
        )
        .bind(&id_str)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;
        let current: ApprovalStatus = parse_enum(&current.ok_or(RepositoryError::NotFound)?)?;
        if current != ApprovalStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "approval {id} is already {current}"
            )));
        }

        let row = sqlx::query(
            r#"UPDATE wf_approvals SET status = ?, resolved_by = ?, resolved_at = ?
               WHERE id = ? AND status = 'pending'
               RETURNING *"#,
        )
        .bind(status.as_str())
        .bind(resolved_by)
        .bind(format_datetime(&resolved_at))
        .bind(&id_str)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;
        let approval = approval_from(&row)?;

        tx.commit().await.map_err(query_err)?;
        Ok(approval)
    }

    async fn list_approvals(
        &self,
        organization_id: &str,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(
            r#"SELECT * FROM wf_approvals
               WHERE organization_id = ? AND (? IS NULL OR status = ?)
               ORDER BY created_at DESC"#,
        )
        .bind(organization_id)
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(approval_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sqlite::pool::tests::test_pool;
    use opsflow_core::repository::workflow::WorkflowRepository;
    use opsflow_types::execution::{ErrorKind, ExecutionError, StepRecord};
    use opsflow_types::trigger::TriggerType;
    use opsflow_types::workflow::{WorkflowConfig, WorkflowDefinition, WorkflowStatus};
    use serde_json::{json, Map, Value};

    /// A store holding one active definition, returned with its id.
    pub(crate) async fn store_with_definition() -> (SqliteStore, Uuid) {
        let store = SqliteStore::new(test_pool().await);
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            root_id: Uuid::now_v7(),
            organization_id: "org-1".to_string(),
            name: "refunds".to_string(),
            version: "1".to_string(),
            status: WorkflowStatus::Active,
            workflow_type: String::new(),
            config: WorkflowConfig::default(),
            metadata: Value::Null,
            created_at: Utc::now(),
        };
        store.save_definition(&def).await.unwrap();
        (store, def.id)
    }

    fn approval(execution_id: Uuid, slug: &str) -> Approval {
        Approval {
            id: Uuid::now_v7(),
            organization_id: "org-1".to_string(),
            wf_execution_id: execution_id,
            step_slug: slug.to_string(),
            status: ApprovalStatus::Pending,
            resource_type: Some("refund".to_string()),
            resource_id: None,
            metadata: json!({ "amount": 120 }),
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn test_execution_roundtrip_with_history_and_error() {
        let (store, def_id) = store_with_definition().await;
        let mut exec = Execution::new("org-1", def_id, Some("a".into()), Map::new());
        exec.trigger_type = Some(TriggerType::Webhook);
        store.create_execution(&exec).await.unwrap();

        let now = Utc::now();
        exec.variables.insert("a".into(), json!({ "ok": true }));
        exec.history.push(StepRecord {
            step_slug: "a".into(),
            step_type: "action".into(),
            outcome: "success".into(),
            attempts: 2,
            started_at: now,
            finished_at: now,
            error: None,
        });
        exec.status = ExecutionStatus::Failed;
        exec.finished_at = Some(now);
        exec.error = Some(ExecutionError {
            kind: ErrorKind::ExecutionFailed,
            message: "boom".into(),
            details: None,
        });
        store.save_execution(&exec).await.unwrap();

        let loaded = store.get_execution("org-1", &exec.id).await.unwrap().unwrap();
        assert_eq!(loaded, exec);
        assert!(store.get_execution("org-2", &exec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_execution_twice_is_duplicate() {
        let (store, def_id) = store_with_definition().await;
        let exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();
        let err = store.create_execution(&exec).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_save_execution_wrong_org_not_found() {
        let (store, def_id) = store_with_definition().await;
        let mut exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();
        exec.organization_id = "org-2".into();
        let err = store.save_execution(&exec).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_count_executions_by_status() {
        let (store, def_id) = store_with_definition().await;
        for status in [ExecutionStatus::Running, ExecutionStatus::Failed, ExecutionStatus::Failed] {
            let mut exec = Execution::new("org-1", def_id, None, Map::new());
            exec.status = status;
            store.create_execution(&exec).await.unwrap();
        }

        let counts = store.count_executions("org-1").await.unwrap();
        assert_eq!(
            counts,
            vec![(ExecutionStatus::Failed, 2), (ExecutionStatus::Running, 1)]
        );
        assert!(store.count_executions("org-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_executions_filters_and_limits() {
        let (store, def_id) = store_with_definition().await;
        for _ in 0..3 {
            let exec = Execution::new("org-1", def_id, None, Map::new());
            store.create_execution(&exec).await.unwrap();
        }
        let mut done = Execution::new("org-1", def_id, None, Map::new());
        done.status = ExecutionStatus::Succeeded;
        store.create_execution(&done).await.unwrap();

        assert_eq!(store.list_executions("org-1", None, 10).await.unwrap().len(), 4);
        assert_eq!(store.list_executions("org-1", None, 2).await.unwrap().len(), 2);
        let succeeded = store
            .list_executions("org-1", Some(ExecutionStatus::Succeeded), 10)
            .await
            .unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].id, done.id);
    }

    #[tokio::test]
    async fn test_lease_exclusive_until_expiry() {
        let (store, def_id) = store_with_definition().await;
        let exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();

        let long = Duration::from_secs(60);
        assert!(store.try_acquire_lease("org-1", &exec.id, "w1", long).await.unwrap());
        assert!(!store.try_acquire_lease("org-1", &exec.id, "w2", long).await.unwrap());
        // Re-entrant for the same holder.
        assert!(store.try_acquire_lease("org-1", &exec.id, "w1", long).await.unwrap());

        store.release_lease(&exec.id, "w2").await.unwrap();
        assert!(!store.try_acquire_lease("org-1", &exec.id, "w2", long).await.unwrap());
        store.release_lease(&exec.id, "w1").await.unwrap();
        assert!(store.try_acquire_lease("org-1", &exec.id, "w2", long).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let (store, def_id) = store_with_definition().await;
        let exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();

        assert!(store.try_acquire_lease("org-1", &exec.id, "w1", Duration::ZERO).await.unwrap());
        assert!(store
            .try_acquire_lease("org-1", &exec.id, "w2", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lease_on_foreign_execution_not_found() {
        let (store, def_id) = store_with_definition().await;
        let exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();
        let err = store
            .try_acquire_lease("org-2", &exec.id, "w1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_stalled_skips_leased_and_terminal() {
        let (store, def_id) = store_with_definition().await;
        let leased = Execution::new("org-1", def_id, None, Map::new());
        let orphan = Execution::new("org-1", def_id, None, Map::new());
        let mut done = Execution::new("org-1", def_id, None, Map::new());
        done.status = ExecutionStatus::Succeeded;
        for e in [&leased, &orphan, &done] {
            store.create_execution(e).await.unwrap();
        }
        store
            .try_acquire_lease("org-1", &leased.id, "w1", Duration::from_secs(60))
            .await
            .unwrap();

        let stalled = store.list_stalled(Utc::now()).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, orphan.id);
    }

    #[tokio::test]
    async fn test_approval_unique_per_step_and_resolves_once() {
        let (store, def_id) = store_with_definition().await;
        let exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();

        let first = approval(exec.id, "refund");
        store.create_approval(&first).await.unwrap();
        let err = store.create_approval(&approval(exec.id, "refund")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));

        let found = store.find_approval("org-1", &exec.id, "refund").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.metadata["amount"], 120);

        let resolved = store
            .resolve_approval("org-1", &first.id, ApprovalStatus::Approved, "alice", Utc::now())
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));

        let again = store
            .resolve_approval("org-1", &first.id, ApprovalStatus::Rejected, "bob", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(again, RepositoryError::Conflict(_)));

        let missing = store
            .resolve_approval("org-2", &first.id, ApprovalStatus::Rejected, "bob", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(missing, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_approvals_by_status() {
        let (store, def_id) = store_with_definition().await;
        let exec = Execution::new("org-1", def_id, None, Map::new());
        store.create_execution(&exec).await.unwrap();
        let a = approval(exec.id, "one");
        store.create_approval(&a).await.unwrap();
        store.create_approval(&approval(exec.id, "two")).await.unwrap();
        store
            .resolve_approval("org-1", &a.id, ApprovalStatus::Rejected, "ops", Utc::now())
            .await
            .unwrap();

        let pending = store
            .list_approvals("org-1", Some(ApprovalStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].step_slug, "two");
        assert_eq!(store.list_approvals("org-1", None).await.unwrap().len(), 2);
    }
}
