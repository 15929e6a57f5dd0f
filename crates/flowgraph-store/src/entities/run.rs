//! `RunEntity`/`StepRunEntity` — the append-only execution audit trail:
//! one row per run, and one row per step attempt in `StepRunEntity`.

use chrono::{DateTime, Utc};
use flowgraph_model::{
    ModelError, Run, RunStatus, StepRun, StepRunStatus, TriggeredBy,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunEntity {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
    #[sqlx(json)]
    pub input: serde_json::Value,
    #[sqlx(json)]
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub triggered_by: String,
    pub start_step_id: String,
}

impl RunEntity {
    pub fn from_run(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            status: status_str(run.status).to_string(),
            input: run.input.clone(),
            output: run.output.clone(),
            started_at: run.started_at,
            completed_at: run.completed_at,
            triggered_by: triggered_by_str(run.triggered_by).to_string(),
            start_step_id: run.start_step_id.clone(),
        }
    }

    pub fn to_run(&self) -> Result<Run, ModelError> {
        Ok(Run {
            id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: parse_status(&self.status)?,
            input: self.input.clone(),
            output: self.output.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            triggered_by: parse_triggered_by(&self.triggered_by)?,
            start_step_id: self.start_step_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepRunEntity {
    pub id: String,
    pub run_id: String,
    pub step_id: String,
    pub status: String,
    #[sqlx(json)]
    pub input: serde_json::Value,
    #[sqlx(json)]
    pub output: Option<serde_json::Value>,
    #[sqlx(json)]
    pub error: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: i32,
    #[sqlx(default)]
    pub branch: Option<String>,
    #[sqlx(default)]
    pub port_chosen: Option<String>,
    #[sqlx(default)]
    pub idempotency_key: Option<String>,
}

impl StepRunEntity {
    pub fn from_step_run(step_run: &StepRun) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: step_run.id.clone(),
            run_id: step_run.run_id.clone(),
            step_id: step_run.step_id.clone(),
            status: step_run_status_str(step_run.status).to_string(),
            input: step_run.input.clone(),
            output: step_run.output.clone(),
            error: step_run.error.as_ref().map(serde_json::to_value).transpose()?,
            started_at: step_run.started_at,
            completed_at: step_run.completed_at,
            attempt: step_run.attempt as i32,
            branch: step_run.branch.clone(),
            port_chosen: step_run.port_chosen.clone(),
            idempotency_key: step_run.idempotency_key.clone(),
        })
    }

    pub fn to_step_run(&self) -> Result<StepRun, ModelError> {
        Ok(StepRun {
            id: self.id.clone(),
            run_id: self.run_id.clone(),
            step_id: self.step_id.clone(),
            status: parse_step_run_status(&self.status)?,
            input: self.input.clone(),
            output: self.output.clone(),
            error: self
                .error
                .as_ref()
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()
                .map_err(|e: serde_json::Error| ModelError::SerializationError(e.to_string()))?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            attempt: self.attempt.max(1) as u32,
            branch: self.branch.clone(),
            port_chosen: self.port_chosen.clone(),
            idempotency_key: self.idempotency_key.clone(),
        })
    }
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> Result<RunStatus, ModelError> {
    Ok(match s {
        "pending" => RunStatus::Pending,
        "running" => RunStatus::Running,
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        other => return Err(ModelError::SerializationError(format!("unknown run status: {other}"))),
    })
}

fn triggered_by_str(t: TriggeredBy) -> &'static str {
    match t {
        TriggeredBy::Manual => "manual",
        TriggeredBy::Schedule => "schedule",
        TriggeredBy::Webhook => "webhook",
    }
}

fn parse_triggered_by(s: &str) -> Result<TriggeredBy, ModelError> {
    Ok(match s {
        "manual" => TriggeredBy::Manual,
        "schedule" => TriggeredBy::Schedule,
        "webhook" => TriggeredBy::Webhook,
        other => return Err(ModelError::SerializationError(format!("unknown trigger kind: {other}"))),
    })
}

fn step_run_status_str(status: StepRunStatus) -> &'static str {
    match status {
        StepRunStatus::Pending => "pending",
        StepRunStatus::Running => "running",
        StepRunStatus::Completed => "completed",
        StepRunStatus::Failed => "failed",
        StepRunStatus::Skipped => "skipped",
        StepRunStatus::Cancelled => "cancelled",
        StepRunStatus::WaitingApproval => "waiting_approval",
    }
}

fn parse_step_run_status(s: &str) -> Result<StepRunStatus, ModelError> {
    Ok(match s {
        "pending" => StepRunStatus::Pending,
        "running" => StepRunStatus::Running,
        "completed" => StepRunStatus::Completed,
        "failed" => StepRunStatus::Failed,
        "skipped" => StepRunStatus::Skipped,
        "cancelled" => StepRunStatus::Cancelled,
        "waiting_approval" => StepRunStatus::WaitingApproval,
        other => return Err(ModelError::SerializationError(format!("unknown step_run status: {other}"))),
    })
}
