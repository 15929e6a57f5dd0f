//! Workflow repository — CRUD operations backing `WorkflowStore`:
//! find_by_id/find_all/create/update/archive over the `workflows` table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::entities::{InsertWorkflow, WorkflowEntity};
use crate::error::DbError;
use flowgraph_engine::{EngineError, WorkflowStore};
use flowgraph_model::Workflow;

#[derive(Clone)]
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<WorkflowEntity>, DbError> {
        let row = sqlx::query_as::<_, WorkflowEntity>(
            r#"
            SELECT id, name, is_archived, definition, version_counter, created_at, updated_at
            FROM workflow_entity
            WHERE id = $1 AND is_archived = false
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_all(&self) -> Result<Vec<WorkflowEntity>, DbError> {
        let rows = sqlx::query_as::<_, WorkflowEntity>(
            r#"
            SELECT id, name, is_archived, definition, version_counter, created_at, updated_at
            FROM workflow_entity
            WHERE is_archived = false
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Upserts by `id`, bumping `version_counter` on conflict — the
    /// workflow editor always writes the full current definition.
    pub async fn upsert(&self, workflow: &InsertWorkflow) -> Result<WorkflowEntity, DbError> {
        let row = sqlx::query_as::<_, WorkflowEntity>(
            r#"
            INSERT INTO workflow_entity (id, name, definition, version_counter)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                definition = EXCLUDED.definition,
                version_counter = workflow_entity.version_counter + 1,
                updated_at = NOW()
            RETURNING id, name, is_archived, definition, version_counter, created_at, updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.definition)
        .bind(workflow.version_counter)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn archive(&self, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_entity SET is_archived = true, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM workflow_entity WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Adapts `WorkflowRepository` to the engine's storage-agnostic
/// `WorkflowStore` trait so the scheduler can run against Postgres exactly
/// as it does against `flowgraph_engine::store::MemoryWorkflowStore`.
#[async_trait]
impl WorkflowStore for WorkflowRepository {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        match self.find_by_id(id).await.map_err(EngineError::from)? {
            Some(entity) => Ok(Some(entity.to_workflow().map_err(EngineError::from)?)),
            None => Ok(None),
        }
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let entity = WorkflowEntity::from_workflow(workflow)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        self.upsert(&InsertWorkflow::from(&entity))
            .await
            .map_err(EngineError::from)?;
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        self.delete(id).await.map_err(EngineError::from)
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        let rows = self.find_all().await.map_err(EngineError::from)?;
        rows.iter()
            .map(|e| e.to_workflow().map_err(EngineError::from))
            .collect()
    }
}
