//! Workflow dispatcher: drives executions one step at a time.
//!
//! Every tick takes the execution lease, loads the step named by
//! `current_step_slug`, runs it through the `StepRunner`, and commits the
//! result through the `CheckpointManager` before the lease is released. A
//! process crash therefore loses at most the step that was in flight.
//!
//! Work reaches the dispatcher through an mpsc queue of execution ids
//! consumed by `spawn_workers`, or synchronously via `run_to_completion`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opsflow_types::approval::{Approval, ApprovalDecision, ApprovalStatus};
use opsflow_types::config::EngineConfig;
use opsflow_types::error::RepositoryError;
use opsflow_types::event::ExecutionEvent;
use opsflow_types::execution::{ErrorKind, Execution, ExecutionStatus};
use opsflow_types::secure::redact_secure;
use opsflow_types::trigger::TriggerType;
use opsflow_types::workflow::{StepDefinition, WorkflowDefinition, WorkflowStatus, ERROR_OUTCOME};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

use super::action::ActionLimits;
use super::checkpoint::{CheckpointError, CheckpointManager, APPROVAL_REQUESTED};
use super::context::{ExecutionContext, VariableScope};
use super::data_source::{load_graph, DataSourceError, DatabaseWorkflowDataSource};
use super::definition::{DefinitionError, WorkflowGraph};
use super::step_runner::{StepError, StepOutput, StepRun, StepRunner};

/// Variable holding the raw trigger payload in a fresh execution.
pub const TRIGGER_VARIABLE: &str = "trigger";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    /// Must exceed the longest step including its retries.
    pub lease_ttl: Duration,
    pub default_step_timeout: Duration,
    pub max_backoff_ms: u64,
    /// Lease holder prefix for this process. Each tick and call leases
    /// under its own `{holder_id}:{uuid}` token.
    pub holder_id: String,
}

impl DispatcherConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
            default_step_timeout: Duration::from_secs(config.default_step_timeout_secs),
            max_backoff_ms: config.max_backoff_ms,
            ..Self::default()
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            lease_ttl: Duration::from_secs(300),
            default_step_timeout: Duration::from_secs(300),
            max_backoff_ms: super::retry::MAX_BACKOFF_MS,
            holder_id: format!("dispatcher-{}", Uuid::now_v7()),
        }
    }
}

// ---------------------------------------------------------------------------
// TickOutcome
// ---------------------------------------------------------------------------

/// What a single dispatcher tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A step committed and the execution is still running.
    Advanced,
    /// Nothing to do right now (waiting for approval).
    Idle,
    /// Another holder owns the lease.
    Busy,
    /// The execution is in a terminal state.
    Finished,
}

// ---------------------------------------------------------------------------
// WorkflowDispatcher
// ---------------------------------------------------------------------------

/// Drives executions stored in `S`.
///
/// Generic over the store so the same dispatcher runs against SQLite in
/// production and the in-memory store in tests.
pub struct WorkflowDispatcher<S>
where
    S: WorkflowRepository + ExecutionRepository + 'static,
{
    store: Arc<S>,
    checkpoint: CheckpointManager<S>,
    runner: StepRunner,
    events: EventBus,
    config: DispatcherConfig,
    /// Cancellation tokens for steps currently running in this process.
    in_flight: DashMap<Uuid, (String, CancellationToken)>,
    /// Validated graphs of immutable (non-draft) versions.
    graphs: DashMap<Uuid, Arc<WorkflowGraph>>,
    /// Execution ids sitting in the queue, to keep each one queued once.
    queued: DashMap<Uuid, ()>,
    queue_tx: mpsc::UnboundedSender<(String, Uuid)>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<(String, Uuid)>>,
}

impl<S> WorkflowDispatcher<S>
where
    S: WorkflowRepository + ExecutionRepository + 'static,
{
    pub fn new(store: Arc<S>, runner: StepRunner, events: EventBus, config: DispatcherConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            checkpoint: CheckpointManager::new(Arc::clone(&store)),
            store,
            runner,
            events,
            config,
            in_flight: DashMap::new(),
            graphs: DashMap::new(),
            queued: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Starting executions
    // -----------------------------------------------------------------------

    /// Build (but do not persist) a new execution of the active version of
    /// `workflow_root_id`.
    pub async fn prepare_execution(
        &self,
        organization_id: &str,
        workflow_root_id: &Uuid,
        trigger_type: TriggerType,
        payload: Value,
        thread_id: Option<String>,
    ) -> Result<Execution, DispatchError> {
        let definition = self
            .store
            .get_active_definition(organization_id, workflow_root_id)
            .await?
            .ok_or(DispatchError::NoActiveVersion(*workflow_root_id))?;
        let graph = self.graph(organization_id, &definition.id).await?;
        let entry = graph.entry_step()?;

        let mut execution = Execution::new(
            organization_id,
            definition.id,
            Some(entry.step_slug.clone()),
            seed_variables(&definition.config.variables, &payload),
        );
        execution.trigger_type = Some(trigger_type);
        execution.thread_id = thread_id;
        Ok(execution)
    }

    /// Create and queue a new execution directly (manual start).
    pub async fn start_execution(
        &self,
        organization_id: &str,
        workflow_root_id: &Uuid,
        payload: Value,
        thread_id: Option<String>,
    ) -> Result<Execution, DispatchError> {
        let execution = self
            .prepare_execution(
                organization_id,
                workflow_root_id,
                TriggerType::Manual,
                payload,
                thread_id,
            )
            .await?;
        self.store.create_execution(&execution).await?;
        self.announce_started(&execution);
        self.enqueue(organization_id, execution.id);
        Ok(execution)
    }

    /// Publish `ExecutionStarted` for an execution that was just persisted.
    pub fn announce_started(&self, execution: &Execution) {
        tracing::info!(
            organization_id = execution.organization_id.as_str(),
            execution_id = %execution.id,
            wf_definition_id = %execution.wf_definition_id,
            entry_step = execution.current_step_slug.as_deref().unwrap_or("<none>"),
            "execution started"
        );
        self.events.publish(ExecutionEvent::ExecutionStarted {
            organization_id: execution.organization_id.clone(),
            execution_id: execution.id,
            wf_definition_id: execution.wf_definition_id,
            trigger_type: execution.trigger_type,
        });
    }

    // -----------------------------------------------------------------------
    // Queue and workers
    // -----------------------------------------------------------------------

    /// Queue an execution for the worker pool. A no-op if already queued.
    pub fn enqueue(&self, organization_id: &str, execution_id: Uuid) {
        if self.queued.insert(execution_id, ()).is_some() {
            return;
        }
        if self
            .queue_tx
            .send((organization_id.to_string(), execution_id))
            .is_err()
        {
            self.queued.remove(&execution_id);
            tracing::warn!(execution_id = %execution_id, "dispatch queue closed");
        }
    }

    /// Spawn `worker_count` workers that tick queued executions until
    /// `shutdown` fires.
    pub fn spawn_workers(self: &Arc<Self>, shutdown: CancellationToken) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for worker in 0..self.config.worker_count.max(1) {
            let dispatcher = Arc::clone(self);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                dispatcher.worker_loop(worker, shutdown).await;
            });
        }
        tracing::info!(workers = self.config.worker_count.max(1), "dispatcher workers started");
        workers
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        loop {
            let next = {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => None,
                    item = rx.recv() => item,
                }
            };
            let Some((organization_id, execution_id)) = next else {
                break;
            };
            self.queued.remove(&execution_id);

            match self.tick(&organization_id, &execution_id).await {
                Ok(TickOutcome::Advanced) => self.enqueue(&organization_id, execution_id),
                Ok(TickOutcome::Busy) => {
                    tracing::debug!(worker, execution_id = %execution_id, "execution leased elsewhere");
                }
                Ok(TickOutcome::Idle | TickOutcome::Finished) => {}
                Err(e) => {
                    tracing::error!(worker, execution_id = %execution_id, error = %e, "dispatcher tick failed");
                }
            }
        }
        tracing::debug!(worker, "dispatcher worker stopped");
    }

    /// Tick an execution until it finishes or parks on an approval.
    pub async fn run_to_completion(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
    ) -> Result<Execution, DispatchError> {
        loop {
            match self.tick(organization_id, execution_id).await? {
                TickOutcome::Advanced => {}
                TickOutcome::Busy => tokio::time::sleep(Duration::from_millis(25)).await,
                TickOutcome::Idle | TickOutcome::Finished => break,
            }
        }
        self.load_execution(organization_id, execution_id).await
    }

    /// Re-queue running executions whose lease has lapsed (crash recovery).
    pub async fn recover_stalled(&self) -> Result<usize, DispatchError> {
        let stalled = self.store.list_stalled(Utc::now()).await?;
        for execution in &stalled {
            self.enqueue(&execution.organization_id, execution.id);
        }
        if !stalled.is_empty() {
            tracing::info!(count = stalled.len(), "re-queued stalled executions");
        }
        Ok(stalled.len())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run at most one step of an execution under its lease.
    pub async fn tick(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
    ) -> Result<TickOutcome, DispatchError> {
        let holder = self.lease_holder();
        let acquired = self
            .store
            .try_acquire_lease(organization_id, execution_id, &holder, self.config.lease_ttl)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => DispatchError::ExecutionNotFound(*execution_id),
                other => other.into(),
            })?;
        if !acquired {
            return Ok(TickOutcome::Busy);
        }

        let result = self.tick_leased(organization_id, execution_id).await;
        self.release(execution_id, &holder).await;
        result
    }

    async fn tick_leased(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
    ) -> Result<TickOutcome, DispatchError> {
        let mut execution = self.load_execution(organization_id, execution_id).await?;
        match execution.status {
            ExecutionStatus::Running => {}
            ExecutionStatus::WaitingApproval => return Ok(TickOutcome::Idle),
            _ => return Ok(TickOutcome::Finished),
        }

        let started_at = Utc::now();
        let graph = match self.graph(organization_id, &execution.wf_definition_id).await {
            Ok(graph) => graph,
            Err(DispatchError::Definition(e)) => {
                return self
                    .fail(&mut execution, None, StepError::from(e), started_at)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let Some(slug) = execution.current_step_slug.clone() else {
            execution.status = ExecutionStatus::Succeeded;
            execution.finished_at = Some(Utc::now());
            self.store.save_execution(&execution).await?;
            self.publish_finished(&execution, None);
            return Ok(TickOutcome::Finished);
        };
        let step = match graph.step(&slug) {
            Ok(step) => step,
            Err(e) => {
                return self
                    .fail(&mut execution, None, StepError::from(e), started_at)
                    .await;
            }
        };

        let approval = if step.step_type == "action" {
            self.store
                .find_approval(organization_id, execution_id, &slug)
                .await?
        } else {
            None
        };
        // One approval covers one run of the action. A cycle back into an
        // approved slug would otherwise reuse it.
        if approval
            .as_ref()
            .is_some_and(|a| a.status == ApprovalStatus::Approved)
            && already_ran(&execution, &slug)
        {
            let error = StepError::Definition(format!(
                "approval-gated action '{slug}' was re-entered after its approved run"
            ));
            return self.fail(&mut execution, Some(step), error, started_at).await;
        }

        let cancel = CancellationToken::new();
        self.in_flight
            .insert(*execution_id, (organization_id.to_string(), cancel.clone()));
        let ctx = ExecutionContext::new(
            organization_id,
            *execution_id,
            execution.thread_id.clone(),
            cancel.clone(),
            VariableScope::new(execution.variables.clone()),
        );
        let limits = self.limits(graph.definition());

        let clock = Instant::now();
        let span = tracing::info_span!(
            "step",
            execution_id = %execution_id,
            step_slug = slug.as_str(),
            step_type = step.step_type.as_str(),
        );
        let result = self
            .runner
            .run(&graph, step, &ctx, limits, approval.as_ref())
            .instrument(span)
            .await;
        self.in_flight.remove(execution_id);

        let outcome = self
            .apply(&mut execution, step, result, started_at, clock)
            .await?;

        // A cancel that raced with a completing step takes effect after the
        // step's result is durable.
        if cancel.is_cancelled() && outcome == TickOutcome::Advanced {
            return self
                .fail(&mut execution, None, StepError::Cancelled, Utc::now())
                .await;
        }
        Ok(outcome)
    }

    /// Persist what a step produced and pick the next position.
    async fn apply(
        &self,
        execution: &mut Execution,
        step: &StepDefinition,
        result: Result<StepRun, StepError>,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<TickOutcome, DispatchError> {
        match result {
            Ok(StepRun::Completed(output)) => {
                let label = output.outcome.label();
                let next = step.next_for(label).map(str::to_string);
                self.commit(execution, step, output, next, started_at, clock)
                    .await
            }
            Ok(StepRun::AwaitingApproval(request)) => {
                let approval = Approval {
                    id: Uuid::now_v7(),
                    organization_id: execution.organization_id.clone(),
                    wf_execution_id: execution.id,
                    step_slug: step.step_slug.clone(),
                    status: ApprovalStatus::Pending,
                    resource_type: request.resource_type,
                    resource_id: request.resource_id,
                    metadata: request.metadata,
                    created_at: Utc::now(),
                    resolved_at: None,
                    resolved_by: None,
                };
                // Parked before the approval exists, so a reviewer can never
                // resolve it while the execution still reads `running`.
                self.checkpoint
                    .mark_waiting(execution, step, started_at)
                    .await?;
                let approval_id = match self.store.create_approval(&approval).await {
                    Ok(()) => approval.id,
                    Err(RepositoryError::Duplicate(_)) => self
                        .store
                        .find_approval(&execution.organization_id, &execution.id, &step.step_slug)
                        .await?
                        .map_or(approval.id, |existing| existing.id),
                    Err(e) => {
                        // Unpark so the next tick requests the approval again.
                        execution.status = ExecutionStatus::Running;
                        execution.history.pop();
                        if let Err(undo) = self.store.save_execution(execution).await {
                            tracing::error!(
                                execution_id = %execution.id,
                                error = %undo,
                                "failed to unpark execution after approval insert failed"
                            );
                        }
                        return Err(e.into());
                    }
                };
                tracing::info!(
                    organization_id = execution.organization_id.as_str(),
                    execution_id = %execution.id,
                    step_slug = step.step_slug.as_str(),
                    approval_id = %approval_id,
                    "approval requested"
                );
                self.events.publish(ExecutionEvent::ApprovalRequested {
                    organization_id: execution.organization_id.clone(),
                    execution_id: execution.id,
                    approval_id,
                    step_slug: step.step_slug.clone(),
                });
                Ok(TickOutcome::Idle)
            }
            Err(e) if e.is_routable() && step.next_steps.contains_key(ERROR_OUTCOME) => {
                tracing::warn!(
                    execution_id = %execution.id,
                    step_slug = step.step_slug.as_str(),
                    error = %e,
                    "step failed, following error edge"
                );
                let next = step.next_steps.get(ERROR_OUTCOME).cloned();
                self.commit(execution, step, StepOutput::failed(&e), next, started_at, clock)
                    .await
            }
            Err(e) => self.fail(execution, Some(step), e, started_at).await,
        }
    }

    async fn commit(
        &self,
        execution: &mut Execution,
        step: &StepDefinition,
        output: StepOutput,
        next: Option<String>,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<TickOutcome, DispatchError> {
        let outcome = output.outcome.label().to_string();
        let attempts = output.attempts;
        self.checkpoint
            .commit_step(execution, step, output, next.as_deref(), started_at)
            .await?;

        self.events.publish(ExecutionEvent::StepCompleted {
            organization_id: execution.organization_id.clone(),
            execution_id: execution.id,
            step_slug: step.step_slug.clone(),
            outcome,
            attempts,
            duration_ms: clock.elapsed().as_millis() as u64,
        });

        if next.is_none() {
            tracing::info!(execution_id = %execution.id, "execution succeeded");
            self.publish_finished(execution, None);
            return Ok(TickOutcome::Finished);
        }
        Ok(TickOutcome::Advanced)
    }

    async fn fail(
        &self,
        execution: &mut Execution,
        step: Option<&StepDefinition>,
        error: StepError,
        started_at: DateTime<Utc>,
    ) -> Result<TickOutcome, DispatchError> {
        self.checkpoint
            .finalize_error(execution, step, &error, started_at)
            .await?;
        tracing::info!(
            organization_id = execution.organization_id.as_str(),
            execution_id = %execution.id,
            step_slug = step.map(|s| s.step_slug.as_str()).unwrap_or("<none>"),
            status = %execution.status,
            error_kind = %error.kind(),
            "execution finished with error"
        );
        let error_kind = (execution.status == ExecutionStatus::Failed).then(|| error.kind());
        self.publish_finished(execution, error_kind);
        Ok(TickOutcome::Finished)
    }

    fn publish_finished(
        &self,
        execution: &Execution,
        error_kind: Option<ErrorKind>,
    ) {
        self.events.publish(ExecutionEvent::ExecutionFinished {
            organization_id: execution.organization_id.clone(),
            execution_id: execution.id,
            status: execution.status,
            error_kind,
        });
    }

    // -----------------------------------------------------------------------
    // Approvals and cancellation
    // -----------------------------------------------------------------------

    /// Record a reviewer decision and resume the execution.
    ///
    /// The decision itself is applied by the next tick: approval lets the
    /// gated action run, rejection ends the execution `cancelled`.
    pub async fn resolve_approval(
        &self,
        organization_id: &str,
        approval_id: &Uuid,
        decision: ApprovalDecision,
        resolved_by: &str,
    ) -> Result<Approval, DispatchError> {
        let pending = self
            .store
            .get_approval(organization_id, approval_id)
            .await?
            .ok_or(DispatchError::ApprovalNotFound(*approval_id))?;
        let execution_id = pending.wf_execution_id;

        let holder = self.lease_holder();
        let acquired = self
            .store
            .try_acquire_lease(organization_id, &execution_id, &holder, self.config.lease_ttl)
            .await?;
        if !acquired {
            return Err(DispatchError::Conflict(format!(
                "execution {execution_id} is being processed"
            )));
        }

        let result = self
            .resolve_leased(organization_id, approval_id, &execution_id, decision, resolved_by)
            .await;
        self.release(&execution_id, &holder).await;

        let approval = result?;
        self.enqueue(organization_id, execution_id);
        Ok(approval)
    }

    async fn resolve_leased(
        &self,
        organization_id: &str,
        approval_id: &Uuid,
        execution_id: &Uuid,
        decision: ApprovalDecision,
        resolved_by: &str,
    ) -> Result<Approval, DispatchError> {
        let approval = self
            .store
            .resolve_approval(
                organization_id,
                approval_id,
                decision.status(),
                resolved_by,
                Utc::now(),
            )
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => DispatchError::ApprovalNotFound(*approval_id),
                RepositoryError::Conflict(message) => DispatchError::Conflict(message),
                other => other.into(),
            })?;

        let mut execution = self.load_execution(organization_id, execution_id).await?;
        if execution.status == ExecutionStatus::WaitingApproval {
            execution.status = ExecutionStatus::Running;
            self.store.save_execution(&execution).await?;
        }
        tracing::info!(
            organization_id,
            execution_id = %execution_id,
            approval_id = %approval_id,
            status = %approval.status,
            resolved_by,
            "approval resolved"
        );
        Ok(approval)
    }

    /// Cancel an execution.
    ///
    /// A step running in this process observes its token and the tick marks
    /// the run `cancelled`; otherwise the execution is finalized here.
    pub async fn cancel(&self, organization_id: &str, execution_id: &Uuid) -> Result<(), DispatchError> {
        let running_here = self
            .in_flight
            .get(execution_id)
            .filter(|entry| entry.0 == organization_id)
            .map(|entry| entry.1.clone());
        if let Some(token) = running_here {
            token.cancel();
            tracing::info!(execution_id = %execution_id, "cancelling in-flight step");
            return Ok(());
        }

        let holder = self.lease_holder();
        let acquired = self
            .store
            .try_acquire_lease(organization_id, execution_id, &holder, self.config.lease_ttl)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => DispatchError::ExecutionNotFound(*execution_id),
                other => other.into(),
            })?;
        if !acquired {
            return Err(DispatchError::Conflict(format!(
                "execution {execution_id} is being processed elsewhere"
            )));
        }

        let result = async {
            let mut execution = self.load_execution(organization_id, execution_id).await?;
            if execution.status.is_terminal() {
                return Err(DispatchError::Conflict(format!(
                    "execution {execution_id} is already {}",
                    execution.status
                )));
            }
            self.fail(&mut execution, None, StepError::Cancelled, Utc::now())
                .await
                .map(|_| ())
        }
        .await;

        self.release(execution_id, &holder).await;
        result
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Fresh lease token. Two writers in one process never share a lease.
    fn lease_holder(&self) -> String {
        format!("{}:{}", self.config.holder_id, Uuid::now_v7())
    }

    async fn release(&self, execution_id: &Uuid, holder: &str) {
        if let Err(e) = self.store.release_lease(execution_id, holder).await {
            tracing::warn!(execution_id = %execution_id, error = %e, "failed to release lease");
        }
    }

    /// Checks a graph needs beyond its structure: loop bodies must not reach
    /// an approval-gated action of the registered connectors.
    pub fn check_graph(&self, graph: &WorkflowGraph) -> Result<(), DefinitionError> {
        self.runner.actions().check_loop_bodies(graph)
    }

    async fn load_execution(
        &self,
        organization_id: &str,
        execution_id: &Uuid,
    ) -> Result<Execution, DispatchError> {
        self.store
            .get_execution(organization_id, execution_id)
            .await?
            .ok_or(DispatchError::ExecutionNotFound(*execution_id))
    }

    /// Load, validate, and cache a workflow version's graph.
    async fn graph(
        &self,
        organization_id: &str,
        definition_id: &Uuid,
    ) -> Result<Arc<WorkflowGraph>, DispatchError> {
        if let Some(graph) = self.graphs.get(definition_id) {
            return Ok(Arc::clone(graph.value()));
        }

        let source =
            DatabaseWorkflowDataSource::new(Arc::clone(&self.store), organization_id, *definition_id);
        let graph = load_graph(&source).await.map_err(|e| match e {
            DataSourceError::NotFound(id) => DispatchError::DefinitionNotFound(id),
            DataSourceError::Repository(e) => DispatchError::Repository(e),
            DataSourceError::Definition(e) => DispatchError::Definition(e),
        })?;
        let report = graph.validate()?;
        self.check_graph(&graph)?;
        for warning in &report.warnings {
            tracing::warn!(
                wf_definition_id = %definition_id,
                warning = warning.as_str(),
                "workflow graph warning"
            );
        }

        let graph = Arc::new(graph);
        if graph.definition().status != WorkflowStatus::Draft {
            self.graphs.insert(*definition_id, Arc::clone(&graph));
        }
        Ok(graph)
    }

    fn limits(&self, definition: &WorkflowDefinition) -> ActionLimits {
        ActionLimits {
            retry_policy: definition.config.retry_policy,
            timeout: definition
                .config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.default_step_timeout),
            max_backoff_ms: self.config.max_backoff_ms,
        }
    }
}

/// Initial variables of an execution: the workflow's configured variables,
/// overlaid with the top-level fields of an object payload, plus the raw
/// payload under `trigger`.
///
/// Secure values are redacted; they never reach persisted variables.
pub fn seed_variables(config_variables: &Map<String, Value>, payload: &Value) -> Map<String, Value> {
    let mut scope = VariableScope::new(config_variables.clone());
    if let Value::Object(fields) = payload {
        scope.merge(fields.clone());
    }
    scope.set(TRIGGER_VARIABLE, payload.clone());
    scope
        .into_map()
        .into_iter()
        .map(|(key, value)| (key, redact_secure(&value)))
        .collect()
}

/// Whether `slug` already finished a run in this execution, beyond merely
/// requesting its approval.
fn already_ran(execution: &Execution, slug: &str) -> bool {
    execution
        .history
        .iter()
        .any(|record| record.step_slug == slug && record.outcome != APPROVAL_REQUESTED)
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Errors surfaced by the dispatcher's public operations.
///
/// Step failures are not errors here; they end up on the execution.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("approval not found: {0}")]
    ApprovalNotFound(Uuid),

    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(Uuid),

    /// The workflow root has no `active` version to run.
    #[error("workflow {0} has no active version")]
    NoActiveVersion(Uuid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
