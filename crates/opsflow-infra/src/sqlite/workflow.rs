//! SQLite workflow repository implementation.
//!
//! Definitions are stored one row per version. Config and metadata are JSON
//! blobs; steps live in `wf_steps` with their outgoing edges as a JSON map.
//! A partial unique index backs the single-active-version rule.

use opsflow_core::repository::workflow::{check_mutable, WorkflowRepository};
use opsflow_types::error::RepositoryError;
use opsflow_types::workflow::{StepDefinition, WorkflowDefinition, WorkflowStatus};
use sqlx::Row;
use uuid::Uuid;

use super::store::{
    format_datetime, from_json, parse_datetime, parse_enum, parse_uuid, query_err, to_json,
    write_err, SqliteStore,
};

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct DefinitionRow {
    id: String,
    root_id: String,
    organization_id: String,
    name: String,
    version: String,
    status: String,
    workflow_type: String,
    config: String,
    metadata: String,
    created_at: String,
}

impl DefinitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            root_id: row.try_get("root_id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            status: row.try_get("status")?,
            workflow_type: row.try_get("workflow_type")?,
            config: row.try_get("config")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        Ok(WorkflowDefinition {
            id: parse_uuid(&self.id)?,
            root_id: parse_uuid(&self.root_id)?,
            organization_id: self.organization_id,
            name: self.name,
            version: self.version,
            status: parse_enum(&self.status)?,
            workflow_type: self.workflow_type,
            config: from_json(&self.config, "workflow config")?,
            metadata: from_json(&self.metadata, "workflow metadata")?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct StepRow {
    id: String,
    wf_definition_id: String,
    step_slug: String,
    name: String,
    step_type: String,
    step_order: i64,
    config: String,
    next_steps: String,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            wf_definition_id: row.try_get("wf_definition_id")?,
            step_slug: row.try_get("step_slug")?,
            name: row.try_get("name")?,
            step_type: row.try_get("step_type")?,
            step_order: row.try_get("step_order")?,
            config: row.try_get("config")?,
            next_steps: row.try_get("next_steps")?,
        })
    }

    fn into_step(self) -> Result<StepDefinition, RepositoryError> {
        Ok(StepDefinition {
            id: parse_uuid(&self.id)?,
            wf_definition_id: parse_uuid(&self.wf_definition_id)?,
            step_slug: self.step_slug,
            name: self.name,
            step_type: self.step_type,
            order: self.step_order as i32,
            config: from_json(&self.config, "step config")?,
            next_steps: from_json(&self.next_steps, "next_steps")?,
        })
    }
}

fn definition_from(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, RepositoryError> {
    DefinitionRow::from_row(row).map_err(query_err)?.into_definition()
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let config = to_json(&def.config, "workflow config")?;
        let metadata = to_json(&def.metadata, "workflow metadata")?;

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let existing = sqlx::query("SELECT * FROM wf_definitions WHERE id = ?")
            .bind(def.id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;
        if let Some(row) = existing {
            check_mutable(&definition_from(&row)?, def)?;
        }

        sqlx::query(
            r#"INSERT INTO wf_definitions
                 (id, root_id, organization_id, name, version, status, workflow_type, config, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 version = excluded.version,
                 status = excluded.status,
                 workflow_type = excluded.workflow_type,
                 config = excluded.config,
                 metadata = excluded.metadata"#,
        )
        .bind(def.id.to_string())
        .bind(def.root_id.to_string())
        .bind(&def.organization_id)
        .bind(&def.name)
        .bind(&def.version)
        .bind(def.status.as_str())
        .bind(&def.workflow_type)
        .bind(&config)
        .bind(&metadata)
        .bind(format_datetime(&def.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            write_err(e, || format!("another version of workflow {} is already active", def.root_id))
        })?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn save_steps(
        &self,
        wf_definition_id: &Uuid,
        steps: &[StepDefinition],
    ) -> Result<(), RepositoryError> {
        let def_id = wf_definition_id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM wf_definitions WHERE id = ?")
                .bind(&def_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_err)?;
        let status: WorkflowStatus = parse_enum(&status.ok_or(RepositoryError::NotFound)?)?;

        if status != WorkflowStatus::Draft {
            let existing: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM wf_steps WHERE wf_definition_id = ?")
                    .bind(&def_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(query_err)?;
            if existing > 0 {
                return Err(RepositoryError::Conflict(format!(
                    "workflow version {wf_definition_id} is {status} and cannot be modified"
                )));
            }
        }

        sqlx::query("DELETE FROM wf_steps WHERE wf_definition_id = ?")
            .bind(&def_id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        for step in steps {
            sqlx::query(
                r#"INSERT INTO wf_steps
                     (id, wf_definition_id, step_slug, name, step_type, step_order, config, next_steps)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(step.id.to_string())
            .bind(&def_id)
            .bind(&step.step_slug)
            .bind(&step.name)
            .bind(&step.step_type)
            .bind(step.order as i64)
            .bind(to_json(&step.config, "step config")?)
            .bind(to_json(&step.next_steps, "next_steps")?)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_err(e, || format!("step slug '{}'", step.step_slug)))?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_definition(
        &self,
        organization_id: &str,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM wf_definitions WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(definition_from).transpose()
    }

    async fn get_active_definition(
        &self,
        organization_id: &str,
        root_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM wf_definitions WHERE organization_id = ? AND root_id = ? AND status = 'active'",
        )
        .bind(organization_id)
        .bind(root_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.as_ref().map(definition_from).transpose()
    }

    async fn list_definitions(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM wf_definitions WHERE organization_id = ? ORDER BY name, created_at",
        )
        .bind(organization_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter().map(definition_from).collect()
    }

    async fn set_definition_status(
        &self,
        organization_id: &str,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let id_str = id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let root_id: Option<String> = sqlx::query_scalar(
            "SELECT root_id FROM wf_definitions WHERE id = ? AND organization_id = ?",
        )
        .bind(&id_str)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_err)?;
        let root_id = root_id.ok_or(RepositoryError::NotFound)?;

        if status == WorkflowStatus::Active {
            sqlx::query(
                "UPDATE wf_definitions SET status = 'inactive' WHERE root_id = ? AND id != ? AND status = 'active'",
            )
            .bind(&root_id)
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        sqlx::query("UPDATE wf_definitions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        tracing::debug!(definition_id = %id, status = %status, "workflow status changed");
        Ok(())
    }

    async fn get_steps(
        &self,
        wf_definition_id: &Uuid,
    ) -> Result<Vec<StepDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM wf_steps WHERE wf_definition_id = ? ORDER BY step_order, step_slug",
        )
        .bind(wf_definition_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| StepRow::from_row(row).map_err(query_err)?.into_step())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::tests::test_pool;
    use chrono::Utc;
    use opsflow_types::workflow::WorkflowConfig;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn store() -> SqliteStore {
        SqliteStore::new(test_pool().await)
    }

    fn definition(root_id: Uuid, status: WorkflowStatus) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            root_id,
            organization_id: "org-1".to_string(),
            name: "orders".to_string(),
            version: "1".to_string(),
            status,
            workflow_type: "automation".to_string(),
            config: WorkflowConfig::default(),
            metadata: json!({ "owner": "ops" }),
            created_at: Utc::now(),
        }
    }

    fn step(def_id: Uuid, slug: &str, order: i32, next: Option<&str>) -> StepDefinition {
        let mut next_steps = BTreeMap::new();
        if let Some(target) = next {
            next_steps.insert("default".to_string(), target.to_string());
        }
        StepDefinition {
            id: Uuid::now_v7(),
            wf_definition_id: def_id,
            step_slug: slug.to_string(),
            name: slug.to_string(),
            step_type: "start".to_string(),
            order,
            config: json!({ "slug": slug }),
            next_steps,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_definition() {
        let store = store().await;
        let def = definition(Uuid::now_v7(), WorkflowStatus::Draft);
        store.save_definition(&def).await.unwrap();

        let loaded = store.get_definition("org-1", &def.id).await.unwrap().unwrap();
        assert_eq!(loaded, def);
        assert!(store.get_definition("org-2", &def.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_draft_is_editable_active_is_not() {
        let store = store().await;
        let mut def = definition(Uuid::now_v7(), WorkflowStatus::Draft);
        store.save_definition(&def).await.unwrap();
        def.name = "renamed".to_string();
        store.save_definition(&def).await.unwrap();

        store
            .set_definition_status("org-1", &def.id, WorkflowStatus::Active)
            .await
            .unwrap();
        def.name = "again".to_string();
        let err = store.save_definition(&def).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_activation_demotes_previous_version() {
        let store = store().await;
        let root = Uuid::now_v7();
        let v1 = definition(root, WorkflowStatus::Draft);
        let v2 = definition(root, WorkflowStatus::Draft);
        store.save_definition(&v1).await.unwrap();
        store.save_definition(&v2).await.unwrap();

        store.set_definition_status("org-1", &v1.id, WorkflowStatus::Active).await.unwrap();
        store.set_definition_status("org-1", &v2.id, WorkflowStatus::Active).await.unwrap();

        let active = store.get_active_definition("org-1", &root).await.unwrap().unwrap();
        assert_eq!(active.id, v2.id);
        let old = store.get_definition("org-1", &v1.id).await.unwrap().unwrap();
        assert_eq!(old.status, WorkflowStatus::Inactive);
    }

    #[tokio::test]
    async fn test_set_status_unknown_definition() {
        let store = store().await;
        let err = store
            .set_definition_status("org-1", &Uuid::now_v7(), WorkflowStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_steps_ordered_and_frozen_after_activation() {
        let store = store().await;
        let def = definition(Uuid::now_v7(), WorkflowStatus::Draft);
        store.save_definition(&def).await.unwrap();
        store
            .save_steps(&def.id, &[step(def.id, "b", 2, None), step(def.id, "a", 1, Some("b"))])
            .await
            .unwrap();

        let steps = store.get_steps(&def.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_slug, "a");
        assert_eq!(steps[0].next_steps.get("default").map(String::as_str), Some("b"));
        assert_eq!(steps[1].config["slug"], "b");

        store.set_definition_status("org-1", &def.id, WorkflowStatus::Active).await.unwrap();
        let err = store.save_steps(&def.id, &[]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_steps_requires_definition() {
        let store = store().await;
        let missing = Uuid::now_v7();
        let err = store.save_steps(&missing, &[step(missing, "a", 0, None)]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_definitions_scoped_to_org() {
        let store = store().await;
        store.save_definition(&definition(Uuid::now_v7(), WorkflowStatus::Draft)).await.unwrap();
        let mut other = definition(Uuid::now_v7(), WorkflowStatus::Draft);
        other.organization_id = "org-2".to_string();
        store.save_definition(&other).await.unwrap();

        assert_eq!(store.list_definitions("org-1").await.unwrap().len(), 1);
        assert_eq!(store.list_definitions("org-2").await.unwrap().len(), 1);
    }
}
