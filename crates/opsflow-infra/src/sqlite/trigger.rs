//! SQLite trigger repository implementation.
//!
//! The trigger's variant payload is stored as JSON in `kind`; the columns
//! used for lookups (credential digest, event type) are denormalized next to
//! it. Idempotency is enforced by a partial unique index over accepted log
//! rows, so a duplicate delivery racing past `find_accepted_log` still fails
//! inside `record_accepted` and leaves no execution behind.

use chrono::{DateTime, Utc};
use opsflow_core::repository::trigger::TriggerRepository;
use opsflow_types::error::RepositoryError;
use opsflow_types::execution::Execution;
use opsflow_types::trigger::{TriggerKind, TriggerLog, TriggerRecord, TriggerType};
use sqlx::Row;
use uuid::Uuid;

use super::execution::{bind_insert, ExecutionColumns};
use super::store::{
    format_datetime, from_json, parse_datetime, parse_enum, parse_opt_datetime, parse_opt_uuid,
    parse_uuid, query_err, to_json, write_err, SqliteStore,
};

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct TriggerRow {
    id: String,
    organization_id: String,
    workflow_root_id: String,
    kind: String,
    is_active: bool,
    last_triggered_at: Option<String>,
    created_at: String,
}

impl TriggerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            workflow_root_id: row.try_get("workflow_root_id")?,
            kind: row.try_get("kind")?,
            is_active: row.try_get("is_active")?,
            last_triggered_at: row.try_get("last_triggered_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_trigger(self) -> Result<TriggerRecord, RepositoryError> {
        Ok(TriggerRecord {
            id: parse_uuid(&self.id)?,
            organization_id: self.organization_id,
            workflow_root_id: parse_uuid(&self.workflow_root_id)?,
            kind: from_json(&self.kind, "trigger kind")?,
            is_active: self.is_active,
            last_triggered_at: parse_opt_datetime(self.last_triggered_at.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct LogRow {
    id: String,
    organization_id: String,
    trigger_type: String,
    trigger_id: Option<String>,
    workflow_root_id: Option<String>,
    status: String,
    idempotency_key: Option<String>,
    source_key: Option<String>,
    wf_execution_id: Option<String>,
    reason: Option<String>,
    created_at: String,
}

impl LogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            trigger_type: row.try_get("trigger_type")?,
            trigger_id: row.try_get("trigger_id")?,
            workflow_root_id: row.try_get("workflow_root_id")?,
            status: row.try_get("status")?,
            idempotency_key: row.try_get("idempotency_key")?,
            source_key: row.try_get("source_key")?,
            wf_execution_id: row.try_get("wf_execution_id")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_log(self) -> Result<TriggerLog, RepositoryError> {
        Ok(TriggerLog {
            id: parse_uuid(&self.id)?,
            organization_id: self.organization_id,
            trigger_type: parse_enum(&self.trigger_type)?,
            trigger_id: parse_opt_uuid(self.trigger_id.as_deref())?,
            workflow_root_id: parse_opt_uuid(self.workflow_root_id.as_deref())?,
            status: parse_enum(&self.status)?,
            idempotency_key: self.idempotency_key,
            source_key: self.source_key,
            wf_execution_id: parse_opt_uuid(self.wf_execution_id.as_deref())?,
            reason: self.reason,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn trigger_from(row: &sqlx::sqlite::SqliteRow) -> Result<TriggerRecord, RepositoryError> {
    TriggerRow::from_row(row).map_err(query_err)?.into_trigger()
}

fn log_from(row: &sqlx::sqlite::SqliteRow) -> Result<TriggerLog, RepositoryError> {
    LogRow::from_row(row).map_err(query_err)?.into_log()
}

/// Lookup columns derived from the trigger variant: (credential digest, event type).
fn lookup_columns(kind: &TriggerKind) -> (Option<&str>, Option<&str>) {
    match kind {
        TriggerKind::Webhook { token_hash, .. } => (Some(token_hash.as_str()), None),
        TriggerKind::ApiKey { key_hash, .. } => (Some(key_hash.as_str()), None),
        TriggerKind::Event { event_type, .. } => (None, Some(event_type.as_str())),
        TriggerKind::Schedule { .. } => (None, None),
    }
}

fn insert_log<'q>(
    log: &'q TriggerLog,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(
        r#"INSERT INTO wf_trigger_logs
             (id, organization_id, trigger_type, trigger_id, workflow_root_id, status,
              idempotency_key, source_key, wf_execution_id, reason, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(log.id.to_string())
    .bind(&log.organization_id)
    .bind(log.trigger_type.as_str())
    .bind(log.trigger_id.map(|id| id.to_string()))
    .bind(log.workflow_root_id.map(|id| id.to_string()))
    .bind(log.status.as_str())
    .bind(&log.idempotency_key)
    .bind(&log.source_key)
    .bind(log.wf_execution_id.map(|id| id.to_string()))
    .bind(&log.reason)
    .bind(format_datetime(&log.created_at))
}

impl SqliteStore {
    async fn find_by_credential(
        &self,
        trigger_type: TriggerType,
        hash: &str,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM wf_triggers WHERE trigger_type = ? AND credential_hash = ?",
        )
        .bind(trigger_type.as_str())
        .bind(hash)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.as_ref().map(trigger_from).transpose()
    }
}

// ---------------------------------------------------------------------------
// TriggerRepository impl
// ---------------------------------------------------------------------------

impl TriggerRepository for SqliteStore {
    async fn save_trigger(&self, trigger: &TriggerRecord) -> Result<(), RepositoryError> {
        let (credential_hash, event_type) = lookup_columns(&trigger.kind);
        sqlx::query(
            r#"INSERT INTO wf_triggers
                 (id, organization_id, workflow_root_id, trigger_type, kind, credential_hash,
                  event_type, is_active, last_triggered_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 workflow_root_id = excluded.workflow_root_id,
                 trigger_type = excluded.trigger_type,
                 kind = excluded.kind,
                 credential_hash = excluded.credential_hash,
                 event_type = excluded.event_type,
                 is_active = excluded.is_active,
                 last_triggered_at = excluded.last_triggered_at"#,
        )
        .bind(trigger.id.to_string())
        .bind(&trigger.organization_id)
        .bind(trigger.workflow_root_id.to_string())
        .bind(trigger.kind.trigger_type().as_str())
        .bind(to_json(&trigger.kind, "trigger kind")?)
        .bind(credential_hash)
        .bind(event_type)
        .bind(trigger.is_active)
        .bind(trigger.last_triggered_at.as_ref().map(format_datetime))
        .bind(format_datetime(&trigger.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| write_err(e, || "trigger credential already registered".to_string()))?;
        Ok(())
    }

    async fn get_trigger(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM wf_triggers WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(trigger_from).transpose()
    }

    async fn find_webhook_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        self.find_by_credential(TriggerType::Webhook, token_hash).await
    }

    async fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<TriggerRecord>, RepositoryError> {
        self.find_by_credential(TriggerType::ApiKey, key_hash).await
    }

    async fn list_event_triggers(
        &self,
        organization_id: &str,
        event_type: &str,
    ) -> Result<Vec<TriggerRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM wf_triggers
               WHERE organization_id = ? AND trigger_type = 'event' AND event_type = ? AND is_active = 1
               ORDER BY created_at"#,
        )
        .bind(organization_id)
        .bind(event_type)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(trigger_from).collect()
    }

    async fn list_schedule_triggers(&self) -> Result<Vec<TriggerRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM wf_triggers WHERE trigger_type = 'schedule' AND is_active = 1 ORDER BY created_at",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(trigger_from).collect()
    }

    async fn list_triggers(
        &self,
        organization_id: &str,
    ) -> Result<Vec<TriggerRecord>, RepositoryError> {
        let rows =
            sqlx::query("SELECT * FROM wf_triggers WHERE organization_id = ? ORDER BY created_at")
                .bind(organization_id)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;
        rows.iter().map(trigger_from).collect()
    }

    async fn touch_trigger(
        &self,
        organization_id: &str,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE wf_triggers SET last_triggered_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .bind(organization_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn append_log(&self, log: &TriggerLog) -> Result<(), RepositoryError> {
        insert_log(log)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| write_err(e, || format!("trigger log {}", log.id)))?;
        Ok(())
    }

    async fn find_accepted_log(
        &self,
        organization_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<TriggerLog>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT * FROM wf_trigger_logs
               WHERE organization_id = ? AND idempotency_key = ? AND status = 'accepted'"#,
        )
        .bind(organization_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.as_ref().map(log_from).transpose()
    }

    async fn record_accepted(
        &self,
        log: &TriggerLog,
        execution: &Execution,
    ) -> Result<(), RepositoryError> {
        let cols = ExecutionColumns::of(execution)?;
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        bind_insert(execution, &cols)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_err(e, || format!("execution {}", execution.id)))?;

        insert_log(log).execute(&mut *tx).await.map_err(|e| {
            write_err(e, || {
                format!("idempotency key '{}'", log.idempotency_key.as_deref().unwrap_or_default())
            })
        })?;

        tx.commit().await.map_err(query_err)?;
        tracing::debug!(
            execution_id = %execution.id,
            log_id = %log.id,
            "recorded accepted trigger"
        );
        Ok(())
    }

    async fn list_logs(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<TriggerLog>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM wf_trigger_logs WHERE organization_id = ?
               ORDER BY created_at DESC LIMIT ?"#,
        )
        .bind(organization_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(log_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::execution::tests::store_with_definition;
    use opsflow_core::repository::execution::ExecutionRepository;
    use opsflow_types::trigger::TriggerLogStatus;
    use serde_json::{json, Map};

    fn trigger(kind: TriggerKind) -> TriggerRecord {
        TriggerRecord {
            id: Uuid::now_v7(),
            organization_id: "org-1".to_string(),
            workflow_root_id: Uuid::now_v7(),
            kind,
            is_active: true,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    fn log(status: TriggerLogStatus, key: Option<&str>, execution: Option<Uuid>) -> TriggerLog {
        TriggerLog {
            id: Uuid::now_v7(),
            organization_id: "org-1".to_string(),
            trigger_type: TriggerType::Webhook,
            trigger_id: None,
            workflow_root_id: None,
            status,
            idempotency_key: key.map(str::to_string),
            source_key: key.map(str::to_string),
            wf_execution_id: execution,
            reason: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_webhook_lookup_by_token_hash() {
        let (store, _) = store_with_definition().await;
        let hook = trigger(TriggerKind::Webhook {
            token_hash: "abc".into(),
            signing_secret: Some("s3cret".into()),
        });
        store.save_trigger(&hook).await.unwrap();

        let found = store.find_webhook_by_token_hash("abc").await.unwrap().unwrap();
        assert_eq!(found, hook);
        assert!(store.find_api_key_by_hash("abc").await.unwrap().is_none());
        assert!(store.find_webhook_by_token_hash("zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_hash_is_unique() {
        let (store, _) = store_with_definition().await;
        let key = |prefix: &str| TriggerKind::ApiKey {
            key_hash: "h1".into(),
            key_prefix: prefix.into(),
            expires_at: None,
        };
        store.save_trigger(&trigger(key("ofk_a"))).await.unwrap();
        let err = store.save_trigger(&trigger(key("ofk_b"))).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_event_and_schedule_listings_skip_inactive() {
        let (store, _) = store_with_definition().await;
        let event = |active: bool| {
            let mut t = trigger(TriggerKind::Event {
                event_type: "order.created".into(),
                event_filter: Some(json!({ "channel": "shop" }).as_object().cloned().unwrap()),
            });
            t.is_active = active;
            t
        };
        store.save_trigger(&event(true)).await.unwrap();
        store.save_trigger(&event(false)).await.unwrap();
        store
            .save_trigger(&trigger(TriggerKind::Schedule {
                cron_expression: "0 9 * * *".into(),
                timezone: "UTC".into(),
            }))
            .await
            .unwrap();

        let events = store.list_event_triggers("org-1", "order.created").await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(store.list_event_triggers("org-2", "order.created").await.unwrap().is_empty());
        assert_eq!(store.list_schedule_triggers().await.unwrap().len(), 1);
        assert_eq!(store.list_triggers("org-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_touch_trigger() {
        let (store, _) = store_with_definition().await;
        let hook = trigger(TriggerKind::Webhook {
            token_hash: "t".into(),
            signing_secret: None,
        });
        store.save_trigger(&hook).await.unwrap();
        let at = Utc::now();
        store.touch_trigger("org-1", &hook.id, at).await.unwrap();
        let loaded = store.get_trigger("org-1", &hook.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_triggered_at, Some(at));

        let err = store.touch_trigger("org-2", &hook.id, at).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_record_accepted_is_atomic_per_key() {
        let (store, def_id) = store_with_definition().await;
        let first = Execution::new("org-1", def_id, Some("a".into()), Map::new());
        store
            .record_accepted(&log(TriggerLogStatus::Accepted, Some("evt-42"), Some(first.id)), &first)
            .await
            .unwrap();

        let second = Execution::new("org-1", def_id, Some("a".into()), Map::new());
        let err = store
            .record_accepted(&log(TriggerLogStatus::Accepted, Some("evt-42"), Some(second.id)), &second)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
        // The losing execution was rolled back with its log row.
        assert!(store.get_execution("org-1", &second.id).await.unwrap().is_none());

        let accepted = store.find_accepted_log("org-1", "evt-42").await.unwrap().unwrap();
        assert_eq!(accepted.wf_execution_id, Some(first.id));
        assert!(store.find_accepted_log("org-2", "evt-42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_accepted_logs_may_share_a_key() {
        let (store, _) = store_with_definition().await;
        store.append_log(&log(TriggerLogStatus::Duplicate, Some("k"), None)).await.unwrap();
        store.append_log(&log(TriggerLogStatus::Duplicate, Some("k"), None)).await.unwrap();
        store.append_log(&log(TriggerLogStatus::RateLimited, None, None)).await.unwrap();

        let logs = store.list_logs("org-1", 10).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(store.find_accepted_log("org-1", "k").await.unwrap().is_none());
        assert_eq!(store.list_logs("org-1", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_keeps_source_key_apart_from_scoped_key() {
        let (store, _) = store_with_definition().await;
        let mut entry = log(TriggerLogStatus::Accepted, Some("event:t-1:e-1"), None);
        entry.trigger_type = TriggerType::Event;
        entry.source_key = Some("e-1".to_string());
        store.append_log(&entry).await.unwrap();

        let found = store.find_accepted_log("org-1", "event:t-1:e-1").await.unwrap().unwrap();
        assert_eq!(found.source_key.as_deref(), Some("e-1"));
        assert!(store.find_accepted_log("org-1", "e-1").await.unwrap().is_none());
    }
}
