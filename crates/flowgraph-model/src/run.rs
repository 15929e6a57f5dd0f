//! `Run` and `StepRun`: the append-only execution audit trail.

use crate::error::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Manual,
    Schedule,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub triggered_by: TriggeredBy,
    pub start_step_id: String,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        start_step_id: impl Into<String>,
        triggered_by: TriggeredBy,
        input: Value,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            status: RunStatus::Pending,
            input,
            output: None,
            started_at: Utc::now(),
            completed_at: None,
            triggered_by,
            start_step_id: start_step_id.into(),
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
    }

    pub fn finish(&mut self, status: RunStatus, output: Option<Value>) {
        self.status = status;
        self.output = output;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    WaitingApproval,
}

/// Append-only record of one attempt to execute one step inside one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub id: String,
    pub run_id: String,
    pub step_id: String,
    pub status: StepRunStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_chosen: Option<String>,
    /// Idempotency key: lets the scheduler re-dispatch a step safely after a
    /// crash without double-applying its effects (at-least-once delivery,
    /// no cross-crash exactly-once guarantee).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl StepRun {
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        input: Value,
        attempt: u32,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            step_id: step_id.into(),
            status: StepRunStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            attempt,
            branch: None,
            port_chosen: None,
            idempotency_key: None,
        }
    }

    pub fn complete(&mut self, output: Value, port_chosen: Option<String>, branch: Option<String>) {
        self.status = StepRunStatus::Completed;
        self.output = Some(output);
        self.port_chosen = port_chosen;
        self.branch = branch;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: StepError) {
        self.status = StepRunStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self) {
        self.status = StepRunStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = StepRunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            StepRunStatus::Completed
                | StepRunStatus::Failed
                | StepRunStatus::Skipped
                | StepRunStatus::Cancelled
        )
    }
}
