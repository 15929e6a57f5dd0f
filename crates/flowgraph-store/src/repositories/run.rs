//! Run/StepRun repositories — the append-only audit trail: find_by_id/
//! find_by_workflow/create/update over `runs`, plus `StepRunRepository`,
//! an insert-only table with one row per step attempt.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::entities::{RunEntity, StepRunEntity};
use crate::error::DbError;
use flowgraph_engine::{EngineError, RunStore};
use flowgraph_model::{Run, StepRun};

#[derive(Clone)]
pub struct RunRepository {
    pool: PgPool,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, run: &RunEntity) -> Result<RunEntity, DbError> {
        let row = sqlx::query_as::<_, RunEntity>(
            r#"
            INSERT INTO run (id, workflow_id, status, input, output, started_at,
                              completed_at, triggered_by, start_step_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, workflow_id, status, input, output, started_at,
                      completed_at, triggered_by, start_step_id
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_id)
        .bind(&run.status)
        .bind(&run.input)
        .bind(&run.output)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(&run.triggered_by)
        .bind(&run.start_step_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update(&self, run: &RunEntity) -> Result<RunEntity, DbError> {
        let row = sqlx::query_as::<_, RunEntity>(
            r#"
            UPDATE run
            SET status = $2, output = $3, completed_at = $4
            WHERE id = $1
            RETURNING id, workflow_id, status, input, output, started_at,
                      completed_at, triggered_by, start_step_id
            "#,
        )
        .bind(&run.id)
        .bind(&run.status)
        .bind(&run.output)
        .bind(run.completed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<RunEntity>, DbError> {
        let row = sqlx::query_as::<_, RunEntity>(
            r#"
            SELECT id, workflow_id, status, input, output, started_at,
                   completed_at, triggered_by, start_step_id
            FROM run
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_by_workflow(&self, workflow_id: &str) -> Result<Vec<RunEntity>, DbError> {
        let rows = sqlx::query_as::<_, RunEntity>(
            r#"
            SELECT id, workflow_id, status, input, output, started_at,
                   completed_at, triggered_by, start_step_id
            FROM run
            WHERE workflow_id = $1
            ORDER BY started_at DESC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[derive(Clone)]
pub struct StepRunRepository {
    pool: PgPool,
}

impl StepRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a fresh attempt record. Never updates an existing row — a
    /// retry always gets its own `id`/`attempt` pair.
    pub async fn append(&self, step_run: &StepRunEntity) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO step_run (id, run_id, step_id, status, input, output, error,
                                   started_at, completed_at, attempt, branch, port_chosen,
                                   idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&step_run.id)
        .bind(&step_run.run_id)
        .bind(&step_run.step_id)
        .bind(&step_run.status)
        .bind(&step_run.input)
        .bind(&step_run.output)
        .bind(&step_run.error)
        .bind(step_run.started_at)
        .bind(step_run.completed_at)
        .bind(step_run.attempt)
        .bind(&step_run.branch)
        .bind(&step_run.port_chosen)
        .bind(&step_run.idempotency_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Updates the terminal fields of an already-appended step_run (status,
    /// output, error, completed_at, branch, port_chosen) without inserting
    /// a new attempt row — used to record completion of the attempt the
    /// scheduler just appended as `running`.
    pub async fn update(&self, step_run: &StepRunEntity) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE step_run
            SET status = $2, output = $3, error = $4, completed_at = $5,
                branch = $6, port_chosen = $7
            WHERE id = $1
            "#,
        )
        .bind(&step_run.id)
        .bind(&step_run.status)
        .bind(&step_run.output)
        .bind(&step_run.error)
        .bind(step_run.completed_at)
        .bind(&step_run.branch)
        .bind(&step_run.port_chosen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.append(step_run).await?;
        }
        Ok(())
    }

    pub async fn find_by_run(&self, run_id: &str) -> Result<Vec<StepRunEntity>, DbError> {
        let rows = sqlx::query_as::<_, StepRunEntity>(
            r#"
            SELECT id, run_id, step_id, status, input, output, error, started_at,
                   completed_at, attempt, branch, port_chosen, idempotency_key
            FROM step_run
            WHERE run_id = $1
            ORDER BY started_at ASC, attempt ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Combines `RunRepository` + `StepRunRepository` behind the engine's
/// storage-agnostic `RunStore` trait, mirroring
/// `flowgraph_engine::store::MemoryRunStore`'s split internally.
#[derive(Clone)]
pub struct PgRunStore {
    pub runs: RunRepository,
    pub step_runs: StepRunRepository,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            runs: RunRepository::new(pool.clone()),
            step_runs: StepRunRepository::new(pool),
        }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs
            .create(&RunEntity::from_run(run))
            .await
            .map_err(EngineError::from)?;
        Ok(())
    }

    async fn update_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs
            .update(&RunEntity::from_run(run))
            .await
            .map_err(EngineError::from)?;
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>, EngineError> {
        match self.runs.find_by_id(id).await.map_err(EngineError::from)? {
            Some(entity) => Ok(Some(entity.to_run().map_err(EngineError::from)?)),
            None => Ok(None),
        }
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Run>, EngineError> {
        let rows = self.runs.find_by_workflow(workflow_id).await.map_err(EngineError::from)?;
        rows.iter().map(|e| e.to_run().map_err(EngineError::from)).collect()
    }

    async fn append_step_run(&self, step_run: &StepRun) -> Result<(), EngineError> {
        let entity = StepRunEntity::from_step_run(step_run)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        self.step_runs.append(&entity).await.map_err(EngineError::from)
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), EngineError> {
        let entity = StepRunEntity::from_step_run(step_run)
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        self.step_runs.update(&entity).await.map_err(EngineError::from)
    }

    async fn list_step_runs(&self, run_id: &str) -> Result<Vec<StepRun>, EngineError> {
        let rows = self.step_runs.find_by_run(run_id).await.map_err(EngineError::from)?;
        rows.iter().map(|e| e.to_step_run().map_err(EngineError::from)).collect()
    }
}
