//! Bundled driver for schedule triggers.
//!
//! Provides:
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - `CronScheduler`, a per-trigger job registry over `tokio-cron-scheduler`
//! - Missed-run detection from `last_triggered_at` for catch-up on restart
//! - `ScheduleDriver`, which keeps the job registry in sync with the stored
//!   schedule triggers and fires them through the trigger pipeline
//!
//! Schedules are evaluated in the trigger's IANA timezone (`UTC` when
//! empty), so "every day at 09:00" follows local wall-clock time across
//! daylight-saving changes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::future::BoxFuture;
use opsflow_types::error::RepositoryError;
use opsflow_types::trigger::{TriggerKind, TriggerRecord};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;
use crate::repository::trigger::TriggerRepository;
use crate::repository::workflow::WorkflowRepository;

use super::trigger::{TriggerError, TriggerIngestor};

/// Upper bound on replayed fires per trigger during catch-up.
pub const MAX_CATCH_UP_RUNS: usize = 100;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("unknown timezone: '{0}'")]
    InvalidTimezone(String),

    #[error("trigger {0} is not scheduled")]
    NotScheduled(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression (with seconds).
///
/// Supported patterns (case-insensitive):
/// - 5-field cron          -> seconds field `0` prepended
/// - 6-field cron          -> unchanged
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute" / "minutely"
/// - "every hour" / "hourly"
/// - "every day" / "daily"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    match trimmed.split_whitespace().count() {
        5 => return Ok(format!("0 {trimmed}")),
        6 => return Ok(trimmed.to_string()),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(SchedulerError::InvalidSchedule(format!(
            "unrecognized schedule format: '{trimmed}'"
        )));
    };

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid());
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let [count, unit] = words.as_slice() else {
        return Err(invalid());
    };
    let n: u32 = count.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be > 0".to_string(),
        ));
    }
    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

fn parse_schedule(input: &str) -> Result<croner::Cron, SchedulerError> {
    normalize_schedule(input)?
        .parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}

/// Resolve an IANA timezone name such as `Europe/Berlin`. Empty means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// Normalize a schedule, check that it parses as cron, and check that its
/// timezone exists.
pub fn validate_schedule(input: &str, timezone: &str) -> Result<String, SchedulerError> {
    parse_schedule(input)?;
    parse_timezone(timezone)?;
    normalize_schedule(input)
}

/// The schedule expression and timezone of a schedule trigger.
fn schedule_of(trigger: &TriggerRecord) -> Option<(&str, &str)> {
    match &trigger.kind {
        TriggerKind::Schedule {
            cron_expression,
            timezone,
        } => Some((cron_expression, timezone)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Missed runs
// ---------------------------------------------------------------------------

/// Fires a schedule trigger should have produced between its
/// `last_triggered_at` and `now`.
///
/// Fire times are computed in the trigger's timezone and returned in UTC.
/// Triggers that never fired have no baseline and report nothing. Invalid
/// schedules and unknown timezones are skipped. At most `MAX_CATCH_UP_RUNS`
/// per trigger, oldest first.
pub fn missed_runs(
    triggers: &[TriggerRecord],
    now: DateTime<Utc>,
) -> Vec<(TriggerRecord, Vec<DateTime<Utc>>)> {
    let mut missed = Vec::new();

    for trigger in triggers.iter().filter(|t| t.is_active) {
        let Some((schedule, timezone)) = schedule_of(trigger) else {
            continue;
        };
        let Some(from) = trigger.last_triggered_at else {
            continue;
        };
        let (Ok(cron), Ok(tz)) = (parse_schedule(schedule), parse_timezone(timezone)) else {
            continue;
        };

        let times: Vec<DateTime<Utc>> = cron
            .iter_after(from.with_timezone(&tz))
            .map(|next| next.with_timezone(&Utc))
            .take_while(|next| *next < now)
            .take(MAX_CATCH_UP_RUNS)
            .collect();

        if !times.is_empty() {
            tracing::warn!(
                trigger_id = %trigger.id,
                organization_id = trigger.organization_id.as_str(),
                count = times.len(),
                "detected missed schedule runs"
            );
            missed.push((trigger.clone(), times));
        }
    }

    missed
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Callback invoked when a scheduled trigger fires.
pub type ScheduleCallback =
    Arc<dyn Fn(ScheduledTrigger, DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identity of a scheduled trigger, handed to the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTrigger {
    pub trigger_id: Uuid,
    pub organization_id: String,
}

/// Tracks a registered cron job for a trigger.
struct ScheduledJob {
    /// The job UUID assigned by tokio-cron-scheduler.
    job_id: Uuid,
    /// The normalized cron expression.
    cron_expr: String,
    timezone: Tz,
}

/// Cron scheduler that wraps `tokio-cron-scheduler::JobScheduler`.
pub struct CronScheduler {
    inner: Arc<RwLock<Option<JobScheduler>>>,
    /// trigger_id -> job metadata.
    jobs: Arc<RwLock<HashMap<Uuid, ScheduledJob>>>,
}

impl CronScheduler {
    /// Create a new cron scheduler (not yet started).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the scheduler. Must be called before scheduling triggers.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);
        tracing::info!("cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler and forget all jobs.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        self.jobs.write().await.clear();
        Ok(())
    }

    /// Register a job for a schedule trigger. Replaces an existing job when
    /// the expression or timezone changed; a no-op when neither did.
    pub async fn schedule_trigger(
        &self,
        trigger: &TriggerRecord,
        callback: ScheduleCallback,
    ) -> Result<(), SchedulerError> {
        let (schedule, timezone) = schedule_of(trigger).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("trigger {} is not a schedule", trigger.id))
        })?;
        let cron_expr = normalize_schedule(schedule)?;
        let timezone = parse_timezone(timezone)?;

        let unchanged = self
            .jobs
            .read()
            .await
            .get(&trigger.id)
            .is_some_and(|job| job.cron_expr == cron_expr && job.timezone == timezone);
        if unchanged {
            return Ok(());
        }
        if self.is_scheduled(&trigger.id).await {
            self.unschedule_trigger(&trigger.id).await?;
        }

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("scheduler not started".to_string()))?;

        let target = ScheduledTrigger {
            trigger_id: trigger.id,
            organization_id: trigger.organization_id.clone(),
        };
        let job = Job::new_async_tz(cron_expr.as_str(), timezone, move |_uuid, _lock| {
            let cb = callback.clone();
            let target = target.clone();
            Box::pin(async move {
                let now = Utc::now();
                tracing::debug!(trigger_id = %target.trigger_id, %now, "schedule fired");
                cb(target, now).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        self.jobs
            .write()
            .await
            .insert(
                trigger.id,
                ScheduledJob {
                    job_id,
                    cron_expr,
                    timezone,
                },
            );
        tracing::info!(
            trigger_id = %trigger.id,
            %job_id,
            timezone = timezone.name(),
            "schedule trigger registered"
        );
        Ok(())
    }

    /// Remove a trigger's job.
    pub async fn unschedule_trigger(&self, trigger_id: &Uuid) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .write()
            .await
            .remove(trigger_id)
            .ok_or(SchedulerError::NotScheduled(*trigger_id))?;

        if let Some(scheduler) = self.inner.read().await.as_ref() {
            scheduler
                .remove(&job.job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }
        tracing::info!(trigger_id = %trigger_id, "schedule trigger removed");
        Ok(())
    }

    pub async fn is_scheduled(&self, trigger_id: &Uuid) -> bool {
        self.jobs.read().await.contains_key(trigger_id)
    }

    pub async fn scheduled_ids(&self) -> Vec<Uuid> {
        self.jobs.read().await.keys().copied().collect()
    }

    pub async fn trigger_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ScheduleDriver
// ---------------------------------------------------------------------------

/// Fires stored schedule triggers through the trigger pipeline.
pub struct ScheduleDriver<S>
where
    S: WorkflowRepository + ExecutionRepository + TriggerRepository + 'static,
{
    ingestor: Arc<TriggerIngestor<S>>,
    scheduler: CronScheduler,
}

impl<S> ScheduleDriver<S>
where
    S: WorkflowRepository + ExecutionRepository + TriggerRepository + 'static,
{
    pub fn new(ingestor: Arc<TriggerIngestor<S>>) -> Self {
        Self {
            ingestor,
            scheduler: CronScheduler::new(),
        }
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    /// Start the cron scheduler, replay missed runs, and register every
    /// active schedule trigger.
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        self.scheduler.start().await?;
        let replayed = self.catch_up(Utc::now()).await?;
        if replayed > 0 {
            tracing::info!(replayed, "replayed missed schedule runs");
        }
        self.sync().await
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.scheduler.stop().await
    }

    /// Reconcile registered jobs with the stored schedule triggers.
    ///
    /// Returns the number of scheduled triggers afterwards. Triggers with
    /// invalid schedules are logged and skipped.
    pub async fn sync(&self) -> Result<usize, SchedulerError> {
        let triggers = self.ingestor.store().list_schedule_triggers().await?;
        let live: Vec<&TriggerRecord> = triggers.iter().filter(|t| t.is_active).collect();

        for id in self.scheduler.scheduled_ids().await {
            if !live.iter().any(|t| t.id == id) {
                self.scheduler.unschedule_trigger(&id).await?;
            }
        }
        for trigger in live {
            let ingestor = Arc::clone(&self.ingestor);
            let callback: ScheduleCallback = Arc::new(move |target, fired_at| {
                let ingestor = Arc::clone(&ingestor);
                Box::pin(async move {
                    if let Err(e) = ingestor
                        .fire_schedule(&target.organization_id, &target.trigger_id, fired_at)
                        .await
                    {
                        tracing::error!(trigger_id = %target.trigger_id, error = %e, "schedule fire failed");
                    }
                })
            });
            if let Err(e) = self.scheduler.schedule_trigger(trigger, callback).await {
                tracing::warn!(trigger_id = %trigger.id, error = %e, "skipping schedule trigger");
            }
        }
        Ok(self.scheduler.trigger_count().await)
    }

    /// Fire every run missed before `now`. Replays are safe: each fire's
    /// idempotency key is derived from its minute.
    pub async fn catch_up(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let triggers = self.ingestor.store().list_schedule_triggers().await?;
        let mut accepted = 0;
        for (trigger, times) in missed_runs(&triggers, now) {
            for fired_at in times {
                let outcome = self
                    .ingestor
                    .fire_schedule(&trigger.organization_id, &trigger.id, fired_at)
                    .await?;
                if outcome.is_accepted() {
                    accepted += 1;
                }
            }
        }
        Ok(accepted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorRegistry;
    use crate::event::EventBus;
    use crate::llm::UnconfiguredLlm;
    use crate::repository::memory::InMemoryStore;
    use crate::workflow::action::ActionExecutor;
    use crate::workflow::definition::tests::{definition, step};
    use crate::workflow::executor::{DispatcherConfig, WorkflowDispatcher};
    use crate::workflow::step_runner::StepRunner;
    use crate::workflow::testing::PlainHasher;
    use chrono::{Duration, TimeZone};
    use serde_json::Value;

    fn schedule_trigger(expr: &str, last: Option<DateTime<Utc>>) -> TriggerRecord {
        TriggerRecord {
            id: Uuid::now_v7(),
            organization_id: "org-1".to_string(),
            workflow_root_id: Uuid::now_v7(),
            kind: TriggerKind::Schedule {
                cron_expression: expr.to_string(),
                timezone: "UTC".to_string(),
            },
            is_active: true,
            last_triggered_at: last,
            created_at: Utc::now(),
        }
    }

    // -------------------------------------------------------------------
    // normalize_schedule
    // -------------------------------------------------------------------

    #[test]
    fn test_normalize_standard_5field_cron() {
        assert_eq!(normalize_schedule("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_6field_cron_passthrough() {
        assert_eq!(normalize_schedule("30 */5 * * * *").unwrap(), "30 */5 * * * *");
    }

    #[test]
    fn test_normalize_intervals() {
        assert_eq!(normalize_schedule("every 5 minutes").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_schedule("every 10 seconds").unwrap(), "*/10 * * * * *");
        assert_eq!(normalize_schedule("every 2 hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_schedule("every 1 minute").unwrap(), "0 */1 * * * *");
        assert_eq!(normalize_schedule("Every 5 Minutes").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_keywords() {
        assert_eq!(normalize_schedule("every minute").unwrap(), "0 * * * * *");
        assert_eq!(normalize_schedule("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("daily").unwrap(), "0 0 0 * * *");
    }

    #[test]
    fn test_normalize_every_day_at_time() {
        assert_eq!(normalize_schedule("every day at 09:30").unwrap(), "0 30 9 * * *");
        assert!(normalize_schedule("every day at 24:00").is_err());
    }

    #[test]
    fn test_validate_schedule_rejects_bad_fields() {
        assert_eq!(validate_schedule("every 5 minutes", "UTC").unwrap(), "0 */5 * * * *");
        assert!(validate_schedule("a b c d e", "UTC").is_err());
    }

    #[test]
    fn test_validate_schedule_checks_timezone() {
        assert!(validate_schedule("daily", "Europe/Berlin").is_ok());
        assert!(validate_schedule("daily", "").is_ok());
        assert!(matches!(
            validate_schedule("daily", "Mars/Olympus_Mons"),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_schedule("run whenever").is_err());
        assert!(normalize_schedule("every 0 minutes").is_err());
        assert!(normalize_schedule("every 3 fortnights").is_err());
    }

    // -------------------------------------------------------------------
    // missed_runs
    // -------------------------------------------------------------------

    #[test]
    fn test_missed_runs_detects_gap() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 30).unwrap();
        let trigger = schedule_trigger("every minute", Some(now - Duration::minutes(10)));
        let missed = missed_runs(&[trigger.clone()], now);
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].0.id, trigger.id);
        assert_eq!(missed[0].1.len(), 10);
        assert!(missed[0].1.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_missed_runs_without_baseline_or_gap() {
        let now = Utc::now();
        let never = schedule_trigger("every minute", None);
        let recent = schedule_trigger("every hour", Some(now - Duration::seconds(5)));
        let garbage = schedule_trigger("not a schedule", Some(now - Duration::hours(1)));
        assert!(missed_runs(&[never, recent, garbage], now).is_empty());
    }

    #[test]
    fn test_missed_runs_follow_trigger_timezone() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 14, 0, 0).unwrap();
        let mut trigger = schedule_trigger("every day at 09:00", Some(now - Duration::hours(12)));
        trigger.kind = TriggerKind::Schedule {
            cron_expression: "every day at 09:00".to_string(),
            timezone: "America/New_York".to_string(),
        };

        let missed = missed_runs(&[trigger], now);
        // 09:00 EDT is 13:00 UTC.
        assert_eq!(missed[0].1, vec![Utc.with_ymd_and_hms(2026, 7, 1, 13, 0, 0).unwrap()]);
    }

    #[test]
    fn test_missed_runs_skip_unknown_timezone() {
        let now = Utc::now();
        let mut trigger = schedule_trigger("every minute", Some(now - Duration::minutes(5)));
        trigger.kind = TriggerKind::Schedule {
            cron_expression: "every minute".to_string(),
            timezone: "Nowhere/Special".to_string(),
        };
        assert!(missed_runs(&[trigger], now).is_empty());
    }

    #[test]
    fn test_missed_runs_capped() {
        let now = Utc::now();
        let trigger = schedule_trigger("every minute", Some(now - Duration::days(2)));
        let missed = missed_runs(&[trigger], now);
        assert_eq!(missed[0].1.len(), MAX_CATCH_UP_RUNS);
    }

    // -------------------------------------------------------------------
    // CronScheduler lifecycle (async)
    // -------------------------------------------------------------------

    fn cb_noop() -> ScheduleCallback {
        Arc::new(|_target, _time| Box::pin(async {}))
    }

    #[tokio::test]
    async fn test_scheduler_schedule_and_unschedule() {
        let scheduler = CronScheduler::new();
        scheduler.start().await.unwrap();

        let trigger = schedule_trigger("every 5 minutes", None);
        let cb: ScheduleCallback = Arc::new(|_target, _time| Box::pin(async {}));
        scheduler.schedule_trigger(&trigger, cb.clone()).await.unwrap();
        scheduler.schedule_trigger(&trigger, cb).await.unwrap();
        assert_eq!(scheduler.trigger_count().await, 1);

        let mut moved = trigger.clone();
        moved.kind = TriggerKind::Schedule {
            cron_expression: "every 5 minutes".to_string(),
            timezone: "Asia/Tokyo".to_string(),
        };
        scheduler.schedule_trigger(&moved, cb_noop()).await.unwrap();
        assert_eq!(scheduler.trigger_count().await, 1);

        let mut bad = moved.clone();
        bad.id = Uuid::now_v7();
        bad.kind = TriggerKind::Schedule {
            cron_expression: "hourly".to_string(),
            timezone: "Atlantis/Capital".to_string(),
        };
        assert!(matches!(
            scheduler.schedule_trigger(&bad, cb_noop()).await,
            Err(SchedulerError::InvalidTimezone(_))
        ));

        scheduler.unschedule_trigger(&trigger.id).await.unwrap();
        assert_eq!(scheduler.trigger_count().await, 0);
        assert!(scheduler.unschedule_trigger(&trigger.id).await.is_err());

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_schedule_before_start_fails() {
        let scheduler = CronScheduler::new();
        let cb: ScheduleCallback = Arc::new(|_target, _time| Box::pin(async {}));
        let result = scheduler
            .schedule_trigger(&schedule_trigger("every minute", None), cb)
            .await;
        assert!(result.is_err());
    }

    // -------------------------------------------------------------------
    // ScheduleDriver
    // -------------------------------------------------------------------

    async fn driver() -> (ScheduleDriver<InMemoryStore>, Arc<InMemoryStore>, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let def = definition("org-1");
        let mut only = step("start", "start", Value::Null, &[]);
        only.wf_definition_id = def.id;
        store.save_definition(&def).await.unwrap();
        store.save_steps(&def.id, &[only]).await.unwrap();

        let events = EventBus::default();
        let runner = StepRunner::new(
            ActionExecutor::new(Arc::new(ConnectorRegistry::new()), None, events.clone()),
            Arc::new(UnconfiguredLlm),
        );
        let dispatcher = Arc::new(WorkflowDispatcher::new(
            Arc::clone(&store),
            runner,
            events,
            DispatcherConfig::default(),
        ));
        let ingestor = Arc::new(TriggerIngestor::new(dispatcher, Arc::new(PlainHasher), 0));
        (ScheduleDriver::new(ingestor), store, def.root_id)
    }

    #[tokio::test]
    async fn test_driver_catch_up_is_replay_safe() {
        let (driver, store, root_id) = driver().await;
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 30).unwrap();
        let mut trigger = schedule_trigger("every minute", Some(now - Duration::minutes(3)));
        trigger.workflow_root_id = root_id;
        store.save_trigger(&trigger).await.unwrap();

        assert_eq!(driver.catch_up(now).await.unwrap(), 3);
        assert_eq!(store.execution_count(), 3);

        // last_triggered_at moved forward; a replay from the old baseline
        // would only produce duplicates.
        assert_eq!(driver.catch_up(now).await.unwrap(), 0);
        assert_eq!(store.execution_count(), 3);
    }

    #[tokio::test]
    async fn test_driver_sync_tracks_active_triggers() {
        let (driver, store, root_id) = driver().await;
        driver.scheduler().start().await.unwrap();

        let mut active = schedule_trigger("every 5 minutes", None);
        active.workflow_root_id = root_id;
        let mut paused = schedule_trigger("hourly", None);
        paused.is_active = false;
        store.save_trigger(&active).await.unwrap();
        store.save_trigger(&paused).await.unwrap();

        assert_eq!(driver.sync().await.unwrap(), 1);
        assert!(driver.scheduler().is_scheduled(&active.id).await);

        active.is_active = false;
        store.save_trigger(&active).await.unwrap();
        assert_eq!(driver.sync().await.unwrap(), 0);

        driver.stop().await.unwrap();
    }
}
