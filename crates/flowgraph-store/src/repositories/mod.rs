//! Repository implementations for database operations.
//!
//! These repositories provide async CRUD operations with compile-time
//! checked SQL queries via sqlx, and each adapts directly to the matching
//! `flowgraph_engine` storage trait (`WorkflowStore`/`RunStore`) so the
//! scheduler can drive a run against Postgres exactly as it does against
//! the in-memory stores used by tests.

pub mod run;
pub mod workflow;

pub use run::*;
pub use workflow::*;

use sqlx::PgPool;

/// Database context bundling the repositories this persistence surface
/// actually needs (Workflow/Run/StepRun) — users/projects/tags/
/// credentials/settings/variables/webhooks are out of scope and have no
/// repository here.
#[derive(Clone)]
pub struct DbContext {
    pub pool: PgPool,
    pub workflows: WorkflowRepository,
    pub runs: PgRunStore,
}

impl DbContext {
    /// Create a new database context from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            workflows: WorkflowRepository::new(pool.clone()),
            runs: PgRunStore::new(pool.clone()),
            pool,
        }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}
