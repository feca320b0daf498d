//! Trigger repository trait definition.
//!
//! Stores trigger records and the append-only trigger log. The accept path
//! writes the execution and its log row in one atomic operation so a crash
//! can never leave an accepted key without its execution (or vice versa).

use chrono::{DateTime, Utc};
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::Execution;
use opsflow_types::trigger::{TriggerLog, TriggerRecord};
use uuid::Uuid;

/// Repository trait for triggers and the trigger log.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TriggerRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    fn save_trigger(
        &self,
        trigger: &TriggerRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_trigger(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<TriggerRecord>, RepositoryError>> + Send;

    /// Webhook lookup by token digest. Tokens are globally unique, so this
    /// is how the organization is discovered.
    fn find_webhook_by_token_hash(
        &self,
        token_hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<TriggerRecord>, RepositoryError>> + Send;

    /// API-key lookup by key digest.
    fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<TriggerRecord>, RepositoryError>> + Send;

    /// Active event subscriptions for an event type in one organization.
    fn list_event_triggers(
        &self,
        organization_id: &str,
        event_type: &str,
    ) -> impl std::future::Future<Output = Result<Vec<TriggerRecord>, RepositoryError>> + Send;

    /// Active schedule triggers across all organizations.
    fn list_schedule_triggers(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<TriggerRecord>, RepositoryError>> + Send;

    fn list_triggers(
        &self,
        organization_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<TriggerRecord>, RepositoryError>> + Send;

    fn touch_trigger(
        &self,
        organization_id: &str,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Trigger log
    // -----------------------------------------------------------------------

    /// Append a non-accepted log row (rejected, duplicate, rate limited).
    fn append_log(
        &self,
        log: &TriggerLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The accepted row holding `idempotency_key` in the organization.
    fn find_accepted_log(
        &self,
        organization_id: &str,
        idempotency_key: &str,
    ) -> impl std::future::Future<Output = Result<Option<TriggerLog>, RepositoryError>> + Send;

    /// Atomically insert an accepted log row and its execution.
    ///
    /// Returns `Duplicate` when another accepted row already holds the key;
    /// nothing is written in that case.
    fn record_accepted(
        &self,
        log: &TriggerLog,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recent first.
    fn list_logs(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<TriggerLog>, RepositoryError>> + Send;
}
