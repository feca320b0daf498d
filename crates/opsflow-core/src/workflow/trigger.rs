//! Trigger ingestion: turns schedule ticks, webhook calls, API-key calls and
//! subscribed events into executions.
//!
//! Every entry family runs the same pipeline:
//!
//! 1. resolve the target and check liveness (`rejected`)
//! 2. check the idempotency key against accepted log rows (`duplicate`)
//! 3. apply the per-organization rate limit (`rate_limited`)
//! 4. accept: the execution and its log row are written atomically
//!
//! Every attempt leaves one `TriggerLog` row, except calls presenting an
//! unknown webhook token or API key, which have no organization to log to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opsflow_types::error::RepositoryError;
use opsflow_types::event::ExecutionEvent;
use opsflow_types::trigger::{TriggerKind, TriggerLog, TriggerLogStatus, TriggerRecord, TriggerType};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;
use crate::repository::trigger::TriggerRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::service::{SignatureVerifier, TokenHasher};

use super::context::VariableScope;
use super::executor::{DispatchError, WorkflowDispatcher};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that prevent a trigger attempt from being logged at all.
///
/// Rejections, duplicates and rate limiting are outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Unknown webhook token or API key.
    #[error("trigger not found")]
    NotFound,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// Caller-supplied part of a trigger attempt.
#[derive(Debug, Clone, Default)]
pub struct TriggerInput {
    pub payload: Value,
    pub idempotency_key: Option<String>,
    pub thread_id: Option<String>,
}

impl TriggerInput {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// The logged result of one trigger attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub log_id: Uuid,
    pub status: TriggerLogStatus,
    /// The new execution when accepted; the original one for duplicates.
    pub execution_id: Option<Uuid>,
    pub reason: Option<String>,
}

impl TriggerOutcome {
    pub fn is_accepted(&self) -> bool {
        self.status == TriggerLogStatus::Accepted
    }
}

/// A resolved trigger attempt on its way through the pipeline.
struct Attempt<'a> {
    organization_id: &'a str,
    trigger_type: TriggerType,
    trigger: Option<&'a TriggerRecord>,
    workflow_root_id: Option<Uuid>,
    input: TriggerInput,
    /// Caller's key when `input.idempotency_key` was scoped.
    source_key: Option<String>,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Fixed one-minute window of accepted triggers per organization.
///
/// A limit of zero disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    windows: DashMap<String, (i64, u32)>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: DashMap::new(),
        }
    }

    /// Take one slot in the organization's current window.
    pub fn try_acquire(&self, organization_id: &str, now: DateTime<Utc>) -> bool {
        if self.per_minute == 0 {
            return true;
        }
        let minute = now.timestamp().div_euclid(60);
        let mut window = self
            .windows
            .entry(organization_id.to_string())
            .or_insert((minute, 0));
        if window.0 != minute {
            *window = (minute, 0);
        }
        if window.1 >= self.per_minute {
            return false;
        }
        window.1 += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// TriggerIngestor
// ---------------------------------------------------------------------------

/// Entry point for all trigger families.
pub struct TriggerIngestor<S>
where
    S: WorkflowRepository + ExecutionRepository + TriggerRepository + 'static,
{
    dispatcher: Arc<WorkflowDispatcher<S>>,
    hasher: Arc<dyn TokenHasher>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    limiter: RateLimiter,
}

impl<S> TriggerIngestor<S>
where
    S: WorkflowRepository + ExecutionRepository + TriggerRepository + 'static,
{
    pub fn new(
        dispatcher: Arc<WorkflowDispatcher<S>>,
        hasher: Arc<dyn TokenHasher>,
        rate_limit_per_minute: u32,
    ) -> Self {
        Self {
            dispatcher,
            hasher,
            verifier: None,
            limiter: RateLimiter::new(rate_limit_per_minute),
        }
    }

    /// Verify signatures on webhooks that carry a signing secret.
    pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    pub fn dispatcher(&self) -> &Arc<WorkflowDispatcher<S>> {
        &self.dispatcher
    }

    /// Webhook call. The idempotency key is required.
    ///
    /// `body` is the raw request body the signature was computed over.
    pub async fn fire_webhook(
        &self,
        token: &str,
        body: &[u8],
        signature: Option<&str>,
        input: TriggerInput,
    ) -> Result<TriggerOutcome, TriggerError> {
        let trigger = self
            .store()
            .find_webhook_by_token_hash(&self.hasher.hash_token(token))
            .await?
            .ok_or(TriggerError::NotFound)?;
        let attempt = Attempt {
            organization_id: &trigger.organization_id,
            trigger_type: TriggerType::Webhook,
            trigger: Some(&trigger),
            workflow_root_id: Some(trigger.workflow_root_id),
            input,
            source_key: None,
        };

        if let TriggerKind::Webhook {
            signing_secret: Some(secret),
            ..
        } = &trigger.kind
        {
            let valid = match (&self.verifier, signature) {
                (Some(verifier), Some(signature)) => verifier.verify(secret, body, signature),
                _ => false,
            };
            if !valid {
                return self.reject(&attempt, "invalid signature").await;
            }
        }
        if attempt.input.idempotency_key.is_none() {
            return self.reject(&attempt, "missing idempotency key").await;
        }
        self.ingest(attempt).await
    }

    /// Call authenticated by an API key. The idempotency key is optional.
    pub async fn fire_api_key(
        &self,
        api_key: &str,
        input: TriggerInput,
    ) -> Result<TriggerOutcome, TriggerError> {
        let trigger = self
            .store()
            .find_api_key_by_hash(&self.hasher.hash_token(api_key))
            .await?
            .ok_or(TriggerError::NotFound)?;
        let attempt = Attempt {
            organization_id: &trigger.organization_id,
            trigger_type: TriggerType::ApiKey,
            trigger: Some(&trigger),
            workflow_root_id: Some(trigger.workflow_root_id),
            input,
            source_key: None,
        };

        if let TriggerKind::ApiKey {
            expires_at: Some(expires_at),
            ..
        } = &trigger.kind
        {
            if *expires_at <= Utc::now() {
                return self.reject(&attempt, "api key expired").await;
            }
        }
        self.ingest(attempt).await
    }

    /// Fan an event out to every matching subscription in the organization.
    ///
    /// The caller's idempotency key is required and is scoped per
    /// subscription, so one event can start each subscribed workflow once.
    pub async fn fire_event(
        &self,
        organization_id: &str,
        event_type: &str,
        input: TriggerInput,
    ) -> Result<Vec<TriggerOutcome>, TriggerError> {
        let triggers = self
            .store()
            .list_event_triggers(organization_id, event_type)
            .await?;
        let scope = match &input.payload {
            Value::Object(fields) => VariableScope::new(fields.clone()),
            _ => VariableScope::new(Map::new()),
        };

        let mut outcomes = Vec::new();
        for trigger in triggers.iter().filter(|t| matches_filter(t, &scope)) {
            // Each subscription dedupes the same event on its own key.
            let mut scoped = input.clone();
            scoped.idempotency_key = input
                .idempotency_key
                .as_ref()
                .map(|key| format!("event:{}:{key}", trigger.id));
            let attempt = Attempt {
                organization_id,
                trigger_type: TriggerType::Event,
                trigger: Some(trigger),
                workflow_root_id: Some(trigger.workflow_root_id),
                input: scoped,
                source_key: input.idempotency_key.clone(),
            };
            let outcome = if attempt.input.idempotency_key.is_none() {
                self.reject(&attempt, "missing idempotency key").await?
            } else {
                self.ingest(attempt).await?
            };
            outcomes.push(outcome);
        }

        tracing::debug!(
            organization_id,
            event_type,
            matched = outcomes.len(),
            "event dispatched to subscriptions"
        );
        Ok(outcomes)
    }

    /// Scheduled fire of `trigger_id` at `fired_at`.
    ///
    /// The idempotency key is synthesized from the minute bucket, so
    /// replaying a missed run or a double tick is harmless.
    pub async fn fire_schedule(
        &self,
        organization_id: &str,
        trigger_id: &Uuid,
        fired_at: DateTime<Utc>,
    ) -> Result<TriggerOutcome, TriggerError> {
        let trigger = self
            .store()
            .get_trigger(organization_id, trigger_id)
            .await?
            .ok_or(TriggerError::NotFound)?;
        let input = TriggerInput::new(json!({
            "triggerId": trigger.id,
            "scheduledAt": fired_at.to_rfc3339(),
        }))
        .with_key(schedule_key(trigger_id, fired_at));
        let attempt = Attempt {
            organization_id,
            trigger_type: TriggerType::Schedule,
            trigger: Some(&trigger),
            workflow_root_id: Some(trigger.workflow_root_id),
            input,
            source_key: None,
        };
        self.ingest(attempt).await
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn ingest(&self, attempt: Attempt<'_>) -> Result<TriggerOutcome, TriggerError> {
        // (a) liveness
        if attempt.trigger.is_some_and(|t| !t.is_active) {
            return self.reject(&attempt, "trigger inactive").await;
        }
        let Some(root_id) = attempt.workflow_root_id else {
            return self.reject(&attempt, "no workflow target").await;
        };
        let execution = match self
            .dispatcher
            .prepare_execution(
                attempt.organization_id,
                &root_id,
                attempt.trigger_type,
                attempt.input.payload.clone(),
                attempt.input.thread_id.clone(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(DispatchError::NoActiveVersion(_)) => {
                return self.reject(&attempt, "no active workflow version").await;
            }
            Err(DispatchError::Definition(e)) => {
                return self.reject(&attempt, &format!("invalid workflow: {e}")).await;
            }
            Err(e) => return Err(e.into()),
        };

        // (b) idempotency
        if let Some(key) = attempt.input.idempotency_key.as_deref() {
            if let Some(existing) = self
                .store()
                .find_accepted_log(attempt.organization_id, key)
                .await?
            {
                return self.duplicate(&attempt, existing.wf_execution_id).await;
            }
        }

        // (c) rate limit
        if !self.limiter.try_acquire(attempt.organization_id, Utc::now()) {
            let log = self.log(&attempt, TriggerLogStatus::RateLimited, None, None);
            return self.append(log).await;
        }

        // (d) accept
        let log = self.log(&attempt, TriggerLogStatus::Accepted, Some(execution.id), None);
        match self.store().record_accepted(&log, &execution).await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(_)) => {
                // Lost a race with a concurrent attempt holding the same key.
                let existing = match attempt.input.idempotency_key.as_deref() {
                    Some(key) => self
                        .store()
                        .find_accepted_log(attempt.organization_id, key)
                        .await?
                        .and_then(|l| l.wf_execution_id),
                    None => None,
                };
                return self.duplicate(&attempt, existing).await;
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(trigger) = attempt.trigger {
            self.store()
                .touch_trigger(attempt.organization_id, &trigger.id, log.created_at)
                .await?;
        }
        self.recorded(&log);
        self.dispatcher.announce_started(&execution);
        self.dispatcher
            .enqueue(attempt.organization_id, execution.id);
        Ok(outcome_of(&log))
    }

    async fn reject(&self, attempt: &Attempt<'_>, reason: &str) -> Result<TriggerOutcome, TriggerError> {
        let log = self.log(attempt, TriggerLogStatus::Rejected, None, Some(reason.to_string()));
        self.append(log).await
    }

    async fn duplicate(
        &self,
        attempt: &Attempt<'_>,
        execution_id: Option<Uuid>,
    ) -> Result<TriggerOutcome, TriggerError> {
        let log = self.log(attempt, TriggerLogStatus::Duplicate, execution_id, None);
        self.append(log).await
    }

    async fn append(&self, log: TriggerLog) -> Result<TriggerOutcome, TriggerError> {
        self.store().append_log(&log).await?;
        self.recorded(&log);
        Ok(outcome_of(&log))
    }

    fn log(
        &self,
        attempt: &Attempt<'_>,
        status: TriggerLogStatus,
        execution_id: Option<Uuid>,
        reason: Option<String>,
    ) -> TriggerLog {
        TriggerLog {
            id: Uuid::now_v7(),
            organization_id: attempt.organization_id.to_string(),
            trigger_type: attempt.trigger_type,
            trigger_id: attempt.trigger.map(|t| t.id),
            workflow_root_id: attempt.workflow_root_id,
            status,
            idempotency_key: attempt.input.idempotency_key.clone(),
            source_key: attempt
                .source_key
                .clone()
                .or_else(|| attempt.input.idempotency_key.clone()),
            wf_execution_id: execution_id,
            reason,
            created_at: Utc::now(),
        }
    }

    fn recorded(&self, log: &TriggerLog) {
        tracing::info!(
            organization_id = log.organization_id.as_str(),
            trigger_type = %log.trigger_type,
            status = %log.status,
            idempotency_key = log.idempotency_key.as_deref().unwrap_or(""),
            reason = log.reason.as_deref().unwrap_or(""),
            "trigger recorded"
        );
        self.dispatcher.events().publish(ExecutionEvent::TriggerRecorded {
            organization_id: log.organization_id.clone(),
            trigger_type: log.trigger_type,
            status: log.status,
            execution_id: log.wf_execution_id,
        });
    }
}

fn outcome_of(log: &TriggerLog) -> TriggerOutcome {
    TriggerOutcome {
        log_id: log.id,
        status: log.status,
        execution_id: log.wf_execution_id,
        reason: log.reason.clone(),
    }
}

/// `schedule:{triggerId}:{minute}` for a scheduled fire.
pub fn schedule_key(trigger_id: &Uuid, fired_at: DateTime<Utc>) -> String {
    format!("schedule:{trigger_id}:{}", fired_at.format("%Y-%m-%dT%H:%M"))
}

/// Every filter field must equal the payload value at that path.
fn matches_filter(trigger: &TriggerRecord, payload: &VariableScope) -> bool {
    match &trigger.kind {
        TriggerKind::Event {
            event_filter: Some(filter),
            ..
        } => filter
            .iter()
            .all(|(path, expected)| payload.get(path) == Some(expected)),
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
