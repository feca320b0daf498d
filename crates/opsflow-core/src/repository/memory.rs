//! In-memory implementation of all repository traits.
//!
//! Every table lives behind one mutex, so multi-entity writes such as
//! `record_accepted` are atomic exactly like a database transaction. Used by
//! the engine tests and by the CLI when running static YAML bundles.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opsflow_types::approval::{Approval, ApprovalStatus};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::{Execution, ExecutionLease, ExecutionStatus};
use opsflow_types::trigger::{TriggerKind, TriggerLog, TriggerLogStatus, TriggerRecord};
use opsflow_types::workflow::{StepDefinition, WorkflowDefinition, WorkflowStatus};
use uuid::Uuid;

use super::execution::ExecutionRepository;
use super::trigger::TriggerRepository;
use super::workflow::{check_mutable, WorkflowRepository};

#[derive(Default)]
struct Tables {
    definitions: HashMap<Uuid, WorkflowDefinition>,
    steps: HashMap<Uuid, Vec<StepDefinition>>,
    executions: HashMap<Uuid, Execution>,
    leases: HashMap<Uuid, ExecutionLease>,
    approvals: HashMap<Uuid, Approval>,
    triggers: HashMap<Uuid, TriggerRecord>,
    logs: Vec<TriggerLog>,
}

/// Process-local store implementing every repository trait.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored trigger log rows (all statuses).
    pub fn log_count(&self) -> usize {
        self.tables().logs.len()
    }

    /// Number of stored executions (all organizations).
    pub fn execution_count(&self) -> usize {
        self.tables().executions.len()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.tables();
        f.debug_struct("InMemoryStore")
            .field("definitions", &t.definitions.len())
            .field("executions", &t.executions.len())
            .field("triggers", &t.triggers.len())
            .field("logs", &t.logs.len())
            .finish()
    }
}

fn lease_expiry(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// WorkflowRepository
// ---------------------------------------------------------------------------

impl WorkflowRepository for InMemoryStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        if let Some(existing) = t.definitions.get(&def.id) {
            check_mutable(existing, def)?;
        }
        t.definitions.insert(def.id, def.clone());
        Ok(())
    }

    async fn save_steps(
        &self,
        wf_definition_id: &Uuid,
        steps: &[StepDefinition],
    ) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        let def = t
            .definitions
            .get(wf_definition_id)
            .ok_or(RepositoryError::NotFound)?;
        if def.status != WorkflowStatus::Draft && t.steps.contains_key(wf_definition_id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow version {wf_definition_id} is {} and cannot be modified",
                def.status
            )));
        }
        t.steps.insert(*wf_definition_id, steps.to_vec());
        Ok(())
    }

    async fn get_definition(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .tables()
            .definitions
            .get(id)
            .filter(|d| d.organization_id == organization_id)
            .cloned())
    }

    async fn get_active_definition(
        &self,
        organization_id: &str,
        root_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .tables()
            .definitions
            .values()
            .find(|d| {
                d.organization_id == organization_id
                    && d.root_id == *root_id
                    && d.status == WorkflowStatus::Active
            })
            .cloned())
    }

    async fn list_definitions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> = self
            .tables()
            .definitions
            .values()
            .filter(|d| d.organization_id == organization_id)
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(defs)
    }

    async fn set_definition_status(
        &self,
        organization_id: &str,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        let root_id = t
            .definitions
            .get(id)
            .filter(|d| d.organization_id == organization_id)
            .map(|d| d.root_id)
            .ok_or(RepositoryError::NotFound)?;

        if status == WorkflowStatus::Active {
            for other in t.definitions.values_mut() {
                if other.root_id == root_id
                    && other.id != *id
                    && other.status == WorkflowStatus::Active
                {
                    other.status = WorkflowStatus::Inactive;
                }
            }
        }
        if let Some(def) = t.definitions.get_mut(id) {
            def.status = status;
        }
        Ok(())
    }

    async fn get_steps(
        &self,
        wf_definition_id: &Uuid,
    ) -> Result<Vec<StepDefinition>, RepositoryError> {
        let mut steps = self
            .tables()
            .steps
            .get(wf_definition_id)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|s| s.order);
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository
// ---------------------------------------------------------------------------

impl ExecutionRepository for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        if t.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Duplicate(format!(
                "execution {}",
                execution.id
            )));
        }
        t.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        match t.executions.get_mut(&execution.id) {
            Some(slot) if slot.organization_id == execution.organization_id => {
                *slot = execution.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn get_execution(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        Ok(self
            .tables()
            .executions
            .get(id)
            .filter(|e| e.organization_id == organization_id)
            .cloned())
    }

    async fn list_executions(
        &self,
        organization_id: &str,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut execs: Vec<Execution> = self
            .tables()
            .executions
            .values()
            .filter(|e| e.organization_id == organization_id)
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        execs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        execs.truncate(limit as usize);
        Ok(execs)
    }

    async fn count_executions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<(ExecutionStatus, u64)>, RepositoryError> {
        let mut counts: Vec<(ExecutionStatus, u64)> = Vec::new();
        for e in self
            .tables()
            .executions
            .values()
            .filter(|e| e.organization_id == organization_id)
        {
            match counts.iter_mut().find(|(s, _)| *s == e.status) {
                Some((_, n)) => *n += 1,
                None => counts.push((e.status, 1)),
            }
        }
        counts.sort_by_key(|(s, _)| s.as_str());
        Ok(counts)
    }

    async fn list_stalled(&self, now: DateTime<Utc>) -> Result<Vec<Execution>, RepositoryError> {
        let t = self.tables();
        Ok(t.executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .filter(|e| t.leases.get(&e.id).is_none_or(|l| l.expires_at <= now))
            .cloned()
            .collect())
    }

    async fn try_acquire_lease(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, RepositoryError> {
        let mut t = self.tables();
        let owned = t
            .executions
            .get(execution_id)
            .is_some_and(|e| e.organization_id == organization_id);
        if !owned {
            return Err(RepositoryError::NotFound);
        }

        let now = Utc::now();
        if let Some(lease) = t.leases.get(execution_id) {
            if lease.holder != holder && lease.expires_at > now {
                return Ok(false);
            }
        }
        t.leases.insert(
            *execution_id,
            ExecutionLease {
                execution_id: *execution_id,
                holder: holder.to_string(),
                expires_at: lease_expiry(ttl),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, execution_id: &Uuid, holder: &str) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        if t.leases.get(execution_id).is_some_and(|l| l.holder == holder) {
            t.leases.remove(execution_id);
        }
        Ok(())
    }

    async fn create_approval(&self, approval: &Approval) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        let exists = t.approvals.values().any(|a| {
            a.wf_execution_id == approval.wf_execution_id && a.step_slug == approval.step_slug
        });
        if exists {
            return Err(RepositoryError::Duplicate(format!(
                "approval for step '{}' of execution {}",
                approval.step_slug, approval.wf_execution_id
            )));
        }
        t.approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get_approval(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<Approval>, RepositoryError> {
        Ok(self
            .tables()
            .approvals
            .get(id)
            .filter(|a| a.organization_id == organization_id)
            .cloned())
    }

    async fn find_approval(
        &self,
        organization_id: &str,
        wf_execution_id: &Uuid,
        step_slug: &str,
    ) -> Result<Option<Approval>, RepositoryError> {
        Ok(self
            .tables()
            .approvals
            .values()
            .find(|a| {
                a.organization_id == organization_id
                    && a.wf_execution_id == *wf_execution_id
                    && a.step_slug == step_slug
            })
            .cloned())
    }

    async fn resolve_approval(
        &self,
        organization_id: &str,
        id: &Uuid,
        status: ApprovalStatus,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Approval, RepositoryError> {
        let mut t = self.tables();
        let approval = t
            .approvals
            .get_mut(id)
            .filter(|a| a.organization_id == organization_id)
            .ok_or(RepositoryError::NotFound)?;
        if approval.status != ApprovalStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "approval {id} is already {}",
                approval.status
            )));
        }
        approval.status = status;
        approval.resolved_by = Some(resolved_by.to_string());
        approval.resolved_at = Some(resolved_at);
        Ok(approval.clone())
    }

    async fn list_approvals(
        &self,
        organization_id: &str,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let mut approvals: Vec<Approval> = self
            .tables()
            .approvals
            .values()
            .filter(|a| a.organization_id == organization_id)
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        approvals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(approvals)
    }
}

// ---------------------------------------------------------------------------
// TriggerRepository
// ---------------------------------------------------------------------------

impl TriggerRepository for InMemoryStore {
    async fn save_trigger(&self, trigger: &TriggerRecord) -> Result<(), RepositoryError> {
        self.tables().triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get_trigger(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        Ok(self
            .tables()
            .triggers
            .get(id)
            .filter(|tr| tr.organization_id == organization_id)
            .cloned())
    }

    async fn find_webhook_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        Ok(self
            .tables()
            .triggers
            .values()
            .find(|tr| {
                matches!(&tr.kind, TriggerKind::Webhook { token_hash: h, .. } if h == token_hash)
            })
            .cloned())
    }

    async fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        Ok(self
            .tables()
            .triggers
            .values()
            .find(|tr| matches!(&tr.kind, TriggerKind::ApiKey { key_hash: h, .. } if h == key_hash))
            .cloned())
    }

    async fn list_event_triggers(
        &self,
        organization_id: &str,
        event_type: &str,
    ) -> Result<Vec<TriggerRecord>, RepositoryError> {
        let mut triggers: Vec<TriggerRecord> = self
            .tables()
            .triggers
            .values()
            .filter(|tr| tr.organization_id == organization_id && tr.is_active)
            .filter(|tr| {
                matches!(&tr.kind, TriggerKind::Event { event_type: et, .. } if et == event_type)
            })
            .cloned()
            .collect();
        triggers.sort_by_key(|tr| tr.created_at);
        Ok(triggers)
    }

    async fn list_schedule_triggers(&self) -> Result<Vec<TriggerRecord>, RepositoryError> {
        Ok(self
            .tables()
            .triggers
            .values()
            .filter(|tr| tr.is_active && matches!(tr.kind, TriggerKind::Schedule { .. }))
            .cloned()
            .collect())
    }

    async fn list_triggers(
        &self,
        organization_id: &str,
    ) -> Result<Vec<TriggerRecord>, RepositoryError> {
        let mut triggers: Vec<TriggerRecord> = self
            .tables()
            .triggers
            .values()
            .filter(|tr| tr.organization_id == organization_id)
            .cloned()
            .collect();
        triggers.sort_by_key(|tr| tr.created_at);
        Ok(triggers)
    }

    async fn touch_trigger(
        &self,
        organization_id: &str,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        let trigger = t
            .triggers
            .get_mut(id)
            .filter(|tr| tr.organization_id == organization_id)
            .ok_or(RepositoryError::NotFound)?;
        trigger.last_triggered_at = Some(at);
        Ok(())
    }

    async fn append_log(&self, log: &TriggerLog) -> Result<(), RepositoryError> {
        self.tables().logs.push(log.clone());
        Ok(())
    }

    async fn find_accepted_log(
        &self,
        organization_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<TriggerLog>, RepositoryError> {
        Ok(self
            .tables()
            .logs
            .iter()
            .find(|l| {
                l.organization_id == organization_id
                    && l.status == TriggerLogStatus::Accepted
                    && l.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .cloned())
    }

    async fn record_accepted(
        &self,
        log: &TriggerLog,
        execution: &Execution,
    ) -> Result<(), RepositoryError> {
        let mut t = self.tables();
        if let Some(key) = log.idempotency_key.as_deref() {
            let taken = t.logs.iter().any(|l| {
                l.organization_id == log.organization_id
                    && l.status == TriggerLogStatus::Accepted
                    && l.idempotency_key.as_deref() == Some(key)
            });
            if taken {
                return Err(RepositoryError::Duplicate(format!("idempotency key '{key}'")));
            }
        }
        if t.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Duplicate(format!(
                "execution {}",
                execution.id
            )));
        }
        t.executions.insert(execution.id, execution.clone());
        t.logs.push(log.clone());
        Ok(())
    }

    async fn list_logs(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<TriggerLog>, RepositoryError> {
        let mut logs: Vec<TriggerLog> = self
            .tables()
            .logs
            .iter()
            .filter(|l| l.organization_id == organization_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit as usize);
        Ok(logs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
