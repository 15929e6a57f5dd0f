//! Run Store: persists workflows, runs, and the append-only step_run
//! event log. `flowgraph-store` provides the Postgres-backed implementation;
//! `MemoryRunStore` here backs tests and the default in-process server.

use crate::error::EngineError;
use async_trait::async_trait;
use flowgraph_model::{Run, StepRun, Workflow};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, EngineError>;
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError>;
    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError>;
}

/// Append-only run/step_run persistence. `StepRun`s are never mutated after
/// `append_step_run` — a retry creates a fresh record with an incremented
/// `attempt` rather than overwriting the prior one.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> Result<(), EngineError>;
    async fn update_run(&self, run: &Run) -> Result<(), EngineError>;
    async fn get_run(&self, id: &str) -> Result<Option<Run>, EngineError>;
    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Run>, EngineError>;

    async fn append_step_run(&self, step_run: &StepRun) -> Result<(), EngineError>;
    /// Updates the most recent (highest-attempt) step_run for a step in a
    /// run; used to record terminal status/output without creating a new
    /// attempt record.
    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), EngineError>;
    async fn list_step_runs(&self, run_id: &str) -> Result<Vec<StepRun>, EngineError>;
}

#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Arc<RwLock<HashMap<String, Run>>>,
    runs_by_workflow: Arc<RwLock<HashMap<String, Vec<String>>>>,
    step_runs: Arc<RwLock<HashMap<String, Vec<StepRun>>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        self.runs_by_workflow
            .write()
            .await
            .entry(run.workflow_id.clone())
            .or_default()
            .push(run.id.clone());
        Ok(())
    }

    async fn update_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.write().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>, EngineError> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Run>, EngineError> {
        let ids = self
            .runs_by_workflow
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .unwrap_or_default();
        let runs = self.runs.read().await;
        Ok(ids.into_iter().filter_map(|id| runs.get(&id).cloned()).collect())
    }

    async fn append_step_run(&self, step_run: &StepRun) -> Result<(), EngineError> {
        self.step_runs
            .write()
            .await
            .entry(step_run.run_id.clone())
            .or_default()
            .push(step_run.clone());
        Ok(())
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), EngineError> {
        let mut guard = self.step_runs.write().await;
        let entries = guard.entry(step_run.run_id.clone()).or_default();
        if let Some(existing) = entries.iter_mut().rev().find(|sr| sr.id == step_run.id) {
            *existing = step_run.clone();
        } else {
            entries.push(step_run.clone());
        }
        Ok(())
    }

    async fn list_step_runs(&self, run_id: &str) -> Result<Vec<StepRun>, EngineError> {
        Ok(self.step_runs.read().await.get(run_id).cloned().unwrap_or_default())
    }
}
